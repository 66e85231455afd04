pub mod applications;
pub mod bounties;
pub mod interactions;
pub mod lifecycle;
pub mod notifications;
