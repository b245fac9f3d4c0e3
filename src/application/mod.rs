// Application layer - Connection lifecycle and view state
pub mod broker;
pub mod connection_manager;
pub mod ingest_service;
pub mod message_buffer;
pub mod view_controller;
