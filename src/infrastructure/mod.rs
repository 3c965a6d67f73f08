//! Infrastructure layer: the Bluetooth protocol core and logging setup.

pub mod bluetooth;
pub mod logging;
