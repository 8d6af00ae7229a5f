pub mod harness;
pub mod net;
pub mod proxy_client;
pub mod upstream;

pub use harness::ProxyHarness;
pub use net::{find_free_port, unused_port};
pub use proxy_client::{get_request, send_request};
pub use upstream::TestUpstream;
