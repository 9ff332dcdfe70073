use async_trait::async_trait;
use etherparse::Ipv4HeaderSlice;

use crate::protocol::ProtocolHandler;

/// Prints delivered payloads; useful when poking a topology by hand.
#[derive(Default)]
pub struct TestHandler {}

#[async_trait]
impl ProtocolHandler for TestHandler {
    async fn handle_packet(&self, header: &Ipv4HeaderSlice<'_>, payload: &[u8]) {
        log::info!(
            "test protocol packet from {}: {}",
            header.source_addr(),
            String::from_utf8_lossy(payload)
        );
    }
}
