pub mod pagination;
pub mod validation;
