//! Domain models

pub mod actor;
pub mod audit;
pub mod case;
pub mod invoice;
pub mod merchant;
pub mod notification;
pub mod order;
