use cwlsubmit_client::Client;
use cwlsubmit_core::config::Config;

pub mod collect;
pub mod status;
pub mod submit;

pub struct AppContext<'a> {
    pub config: &'a Config,
    pub client: &'a Client,
    pub debug: bool,
}
