pub mod domain;
pub mod ports;

pub use domain::{
    ChatTurn, GoalContext, GoalStatus, GoalSummary, MilestoneContext, NewChatTurn,
    ProfileContext, Sender, User, UserCredentials,
};
pub use ports::{ChatGenerationService, ChatStore, ChunkStream, PortError, PortResult};
