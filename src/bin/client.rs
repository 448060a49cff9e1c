//! Client executable: transcodes between the wire protocol and JSON stdio.

use clap::Parser;
use ev3_broker::node::ClientNode;

#[derive(Parser)]
#[command(name = "ev3-broker-client")]
#[command(about = "Translate broker datagrams to JSON on stdout and JSON commands to datagrams")]
struct Args {
    /// UDP port used for both sending and receiving
    #[arg(long, default_value_t = 4721)]
    port: u16,

    /// Source name announced on the network
    #[arg(long, default_value = "EV3_CLIENT")]
    name: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    ev3_broker::cli::reject_duplicate_flags(&["port", "name"]);
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(&args) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> ev3_broker::Result<()> {
    let mut node = ClientNode::new(&args.name, args.port)?;
    node.run()
}
