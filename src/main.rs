use std::sync::Arc;

use ripd::node::NodeBuilder;
use ripd::protocol::test::TestHandler;
use ripd::protocol::Protocol;
use ripd::Args;

#[tokio::main]
async fn main() {
    env_logger::init();

    let args = match Args::try_from(std::env::args()) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            eprintln!("Usage: ./ripd <link-file>");
            std::process::exit(1);
        }
    };

    log::info!("{}", args);

    let node = match NodeBuilder::new(&args)
        .with_protocol_handler(Protocol::Test, TestHandler::default())
        .build()
        .await
    {
        Ok(n) => n,
        Err(e) => {
            // Link initialization is the one fatal failure.
            eprintln!("Failed to initialize links: {:?}", e);
            std::process::exit(1);
        }
    };

    Arc::new(node).run().await;
}
