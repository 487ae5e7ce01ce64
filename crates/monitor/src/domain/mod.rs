#![forbid(unsafe_code)]

mod device;
mod event;
mod ids;
mod port;
mod diagnostic;

pub use device::{ConnectionState, Device, DeviceRecord};
pub use event::{AttributeChange, ConnectionEvent, EventBatch, EventKind, LoggedEvent};
pub use ids::{DeviceKey, PortName};
pub use port::{LineSettings, Port, PortKind, PortRecord};
pub use diagnostic::ThroughputResult;
