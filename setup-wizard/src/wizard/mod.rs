//! Resumable wizard engine.
//!
//! [`FormContainer`] owns the form and its persistence; [`WizardController`] owns the step
//! machine and the install run.

pub mod container;
pub mod controller;
pub mod persistence;

pub use container::FormContainer;
pub use controller::{WizardController, WizardError};
