//! Business services.

pub mod campaign;
pub mod progress;
pub mod provider;
pub mod resolver;
pub mod rewrite;
pub mod rotation;

pub use campaign::{CampaignParams, CampaignService, StartCampaignInput};
pub use progress::{JobSnapshot, ProgressBroadcaster};
pub use provider::{
    AccessTokenSource, GmailApiProvider, OutgoingEmail, ProviderAdapter, SendError,
    SmtpRelayProvider, StaticTokenSource,
};
pub use resolver::{RecipientResolver, ResolvedCampaign};
pub use rewrite::{ContentRewriter, NoopRewriter, RewriteContext, TrackingRewriter};
pub use rotation::{RotationStrategy, RoundRobinRotation, UniformRandomRotation};
