//! Server executable: runs on the robot next to the motors.

use clap::Parser;
use ev3_broker::motors::DEFAULT_MOTOR_ROOT;
use ev3_broker::node::ServerNode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ev3-broker-server")]
#[command(about = "Broadcast motor positions and execute remote motor commands")]
struct Args {
    /// UDP port used for both sending and receiving
    #[arg(long, default_value_t = 4721)]
    port: u16,

    /// Source name announced on the network; must be unique per robot
    #[arg(long, default_value = "EV3")]
    name: String,

    /// Directory scanned for motor devices
    #[arg(long, default_value = DEFAULT_MOTOR_ROOT)]
    motor_root: PathBuf,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    ev3_broker::cli::reject_duplicate_flags(&["port", "name", "motor-root"]);
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
    let mut node = ServerNode::new(&args.name, args.port, &args.motor_root)?;
    node.run()
}
