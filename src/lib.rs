pub mod config;
pub mod db;
pub mod delivery;
pub mod dispatcher;
pub mod guard;
pub mod health;
pub mod identity;
pub mod mailer;
pub mod model;
pub mod poller;
pub mod services;
pub mod store;
pub mod templates;
