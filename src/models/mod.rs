pub mod auth_token;
pub mod invitation;
pub mod notification;
pub mod push_subscription;
pub mod round;
pub mod school;
pub mod settings;
pub mod team;
pub mod tournament;
pub mod user;
pub mod waiver;
