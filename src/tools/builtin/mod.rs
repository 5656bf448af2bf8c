pub mod zendesk;

pub use zendesk::ZendeskTicketTool;
