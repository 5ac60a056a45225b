pub mod form;
pub mod responses;
pub mod step;
