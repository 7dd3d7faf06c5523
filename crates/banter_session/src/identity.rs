#![forbid(unsafe_code)]

use banter_remote::{AuthContext, Identity, SharedIdentityService};
use tracing::{debug, info};

/// Where the session stands with the identity provider.
#[derive(Debug, Clone)]
pub enum IdentityState {
	/// The first resolution has not completed yet.
	Resolving,

	Authenticated(Identity),

	/// No usable session. A normal outcome, never an error.
	Unauthenticated,
}

impl IdentityState {
	pub fn identity(&self) -> Option<&Identity> {
		match self {
			IdentityState::Authenticated(identity) => Some(identity),
			_ => None,
		}
	}

	pub fn is_authenticated(&self) -> bool {
		matches!(self, IdentityState::Authenticated(_))
	}
}

/// Sole owner of the session's identity state.
///
/// Every access to chat content is gated on what this resolver last said,
/// and it is re-asked after anything that can change the answer.
pub struct IdentityGate {
	svc: SharedIdentityService,
	state: IdentityState,
}

impl IdentityGate {
	pub fn new(svc: SharedIdentityService) -> Self {
		Self {
			svc,
			state: IdentityState::Resolving,
		}
	}

	pub fn state(&self) -> &IdentityState {
		&self.state
	}

	/// Auth material for remote calls, when signed in.
	pub fn auth_context(&self) -> Option<AuthContext> {
		self.state.identity().map(Identity::context)
	}

	/// Ask the provider who is signed in. Failure of any kind resolves
	/// to `Unauthenticated`; it is not surfaced as a fault.
	pub async fn resolve(&mut self) -> IdentityState {
		match self.svc.current_identity().await {
			Ok(identity) => {
				info!(user = %identity.username, "identity resolved");
				self.state = IdentityState::Authenticated(identity);
			}
			Err(e) => {
				debug!(reason = %e, "identity did not resolve; treating as signed out");
				self.state = IdentityState::Unauthenticated;
			}
		}
		self.state.clone()
	}

	/// Sign out, then re-resolve so the state reflects the provider.
	pub async fn sign_out(&mut self) -> IdentityState {
		self.svc.sign_out().await;
		self.resolve().await
	}
}
