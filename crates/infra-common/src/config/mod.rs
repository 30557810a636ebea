/*!
Configuration System

Section/key configuration store mirroring the "rc" files of the native SDK.
Values are kept as strings and converted on read, each getter taking the
default to use when the key is absent or malformed.
*/

pub mod store;

pub use store::{ConfigSource, ConfigStore};
