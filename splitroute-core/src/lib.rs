pub mod error;
pub mod event;
pub mod gateway;
pub mod logging;
pub mod managed_set;
pub mod prefix;
pub mod route;
pub mod shell_command_ext;

pub use error::Error;
pub use event::NetworkEvent;
pub use gateway::GatewaySnapshot;
pub use managed_set::ManagedSet;
pub use prefix::Prefix;
pub use route::Route;
