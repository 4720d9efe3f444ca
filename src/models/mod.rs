pub mod account;
pub mod campaign;
pub mod envelope;
pub mod outbound;

pub use account::{Account, NewAccount};
pub use campaign::{Campaign, CampaignStats, OverallStats};
pub use envelope::InboundEnvelope;
pub use outbound::{OutboundMessage, SentRecord};
