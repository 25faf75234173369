pub mod gateway;
pub mod handlers;
pub mod rooms;
pub mod ws;

pub use gateway::MessagingGateway;
pub use rooms::RoomRegistry;
