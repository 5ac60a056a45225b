// Install pipeline + finalize transport

pub mod installer;
pub mod setup;
