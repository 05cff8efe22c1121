pub mod appcast;
pub mod config;
pub mod feed;
pub mod hatom;
pub mod listing;
