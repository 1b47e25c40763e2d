// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The recording interfaces shared by all metric types.
//!
//! Each metric type implements its trait as inherent methods, so the traits
//! don't need to be in scope for the methods to be callable. Bindings and
//! generic instrumentation code can program against the traits instead.

mod boolean;
mod counter;
mod custom_distribution;
mod datetime;
mod memory_distribution;
mod object;
mod ping;
mod string;
mod string_list;
mod timing_distribution;
mod uuid;

pub use self::boolean::Boolean;
pub use self::counter::Counter;
pub use self::custom_distribution::CustomDistribution;
pub use self::datetime::Datetime;
pub use self::memory_distribution::MemoryDistribution;
pub use self::object::Object;
pub use self::ping::Ping;
pub use self::string::String;
pub use self::string_list::StringList;
pub use self::timing_distribution::TimingDistribution;
pub use self::uuid::Uuid;
