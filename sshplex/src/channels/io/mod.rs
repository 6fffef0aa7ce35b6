mod rx;
pub use rx::ChannelReader;

mod tx;
pub use tx::ChannelWriter;
