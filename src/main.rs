use clap::Parser;

use retire_sim::api::{self, Cli};

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    match api::run(cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
