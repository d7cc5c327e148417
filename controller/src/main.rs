mod host;
mod playback;
mod serial;
mod store;
mod web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
