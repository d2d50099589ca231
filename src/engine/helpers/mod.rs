pub mod message_builder;
