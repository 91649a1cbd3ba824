pub mod bridge;
pub mod config;
pub mod consensus;
pub mod detector;
pub mod error;
pub mod gossip;
pub mod node;
pub mod quorum;
pub mod replication;
pub mod scavenger;
pub mod shell;
pub mod util;
pub mod test_util;


#[cfg(test)]
mod test {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .try_init()
            .ok();
    }
}
