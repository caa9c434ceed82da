#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hemorenew_lib::run().await
}
