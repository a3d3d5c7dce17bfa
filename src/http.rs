pub use chatcore::net::{HttpClient, HttpRequest, HttpResponse};
pub use chatdesk_ureq_http_client::UreqHttpClient;
