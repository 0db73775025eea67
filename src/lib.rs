//! WhatsApp Agents for Modular Agent: convert Markdown to WhatsApp's
//! text-formatting dialect and post messages through the Cloud API.
#![recursion_limit = "256"]

mod agents;
pub mod whatsapp;

pub use whatsapp::md_to_whatsapp;
