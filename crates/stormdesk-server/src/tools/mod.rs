//! The tools this server exposes over the tool channel.

mod servicenow;
mod weather;

pub use servicenow::{IncidentTool, ServiceNowCredentials};
pub use weather::{AlertsTool, ForecastTool, NwsClient, NWS_API_BASE};
