//! Protocol-specific message payloads.
//!
//! Every [`crate::ClientActionMessage`] carries exactly one [`Payload`], and the
//! variant must match the envelope's protocol. Mismatches are rejected by the
//! proposers in `tandem-core` as malformed input.

mod app;
mod state;

use serde::{Deserialize, Serialize};

pub use app::{AppInterface, InstallData, MetachannelInstallData, PeerBalance, Terms};
pub use state::{UninstallData, UpdateData};

/// Protocol parameters carried in a round message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// SETUP carries no parameters beyond the envelope addresses
    Setup,
    /// INSTALL parameters
    Install(InstallData),
    /// UPDATE parameters
    Update(UpdateData),
    /// UNINSTALL parameters
    Uninstall(UninstallData),
    /// Three-party install parameters
    InstallMetachannelApp(MetachannelInstallData),
}

impl Payload {
    /// Short name of the variant, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Install(_) => "install",
            Self::Update(_) => "update",
            Self::Uninstall(_) => "uninstall",
            Self::InstallMetachannelApp(_) => "install-metachannel-app",
        }
    }
}
