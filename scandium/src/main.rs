use std::process::ExitCode;

use clap::Parser;

#[derive(clap::Parser, Debug)]
#[command(
    author,
    version,
    about = "Scan coordinator for container image vulnerability scanning",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    Api(scandium_api::Run),
}

impl Cli {
    async fn run(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Command::Api(run) => run.run().await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = env_logger::try_init();

    match Cli::parse().run().await {
        Ok(code) => Ok(code),
        Err(err) => {
            eprintln!("Error: {err}");
            for (n, cause) in err.chain().enumerate().skip(1) {
                eprintln!("  {n}: {cause}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
