mod client;

pub use client::MarqueeWsClient;
