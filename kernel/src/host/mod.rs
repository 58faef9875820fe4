//! Host collaborators and shared engine state.
//!
//! The kernel does not authenticate callers itself. It asks an externally
//! supplied [`HostServices`] for the calling user and checks permissions on
//! the returned [`AppletUser`].

pub mod loader;
pub mod permissions;
pub mod state;

pub use loader::load_applet;
pub use permissions::{
    AppletUser, HostError, HostServices, PermissionError, StaticUser, TrustedHeaderHostServices,
};
pub use state::EngineState;
