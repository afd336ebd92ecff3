use activity_chronicle_app::Args;
use chronicle::api::Error;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv::dotenv().ok();
    env_logger::init();
    let args = Args::parse();

    if let Some(report) = activity_chronicle_app::collect_activity(args).await? {
        let json = serde_json::to_string_pretty(&report).map_err(anyhow::Error::from)?;
        println!("{}", json);
    }

    Ok(())
}
