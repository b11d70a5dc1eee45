use anyhow::bail;
use clap::{Parser, Subcommand};
use common::{ErrorBody, InsertAck, SensorView};
use reqwest::blocking::{Client, Response};

const SERVER_PREFIX: &str = "http://localhost:3000";

#[derive(Debug, Parser)]
#[command(name = "sensor-client", about = "Talk to a sensor dashboard server")]
struct Cli {
    #[arg(long, env = "SENSOR_SERVER", default_value = SERVER_PREFIX)]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
enum Command {
    /// Check that the server can reach its database
    Probe,
    /// Record one reading
    Post {
        id: i32,
        #[arg(allow_hyphen_values = true)]
        value: f64,
    },
    /// Show the newest reading of one sensor
    Latest { id: i32 },
    /// Show the newest reading of every sensor
    All,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let server = cli.server.trim_end_matches('/');

    match cli.command {
        Command::Probe => {
            let body = check(client.get(format!("{server}/sensor")).send()?)?.text()?;
            println!("{body}");
        }
        Command::Post { id, value } => {
            let ack: InsertAck = check(
                client
                    .post(format!("{server}/sensor/{id}"))
                    .query(&[("value", value)])
                    .send()?,
            )?
            .json()?;
            println!("{} (sensor {}, value {})", ack.message, ack.sensor_id, ack.value);
        }
        Command::Latest { id } => {
            let view: SensorView = check(
                client
                    .get(format!("{server}/sensor/{id}"))
                    .query(&[("json", "true")])
                    .send()?,
            )?
            .json()?;
            println!("{}", describe(&view));
        }
        Command::All => {
            let views: Vec<SensorView> =
                check(client.get(format!("{server}/sensor/all")).send()?)?.json()?;
            if views.is_empty() {
                println!("no sensors have reported yet");
            }
            for view in &views {
                println!("{}", describe(view));
            }
        }
    }

    Ok(())
}

/// Passes 2xx responses through and turns anything else into an error
/// carrying the server's message.
fn check(response: Response) -> anyhow::Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<ErrorBody>()
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());
    bail!("server answered {status}: {message}")
}

fn describe(view: &SensorView) -> String {
    format!(
        "{:>4}  {:<12} {:>8.2}  {}",
        view.id,
        view.name,
        view.value,
        view.timestamp.to_rfc3339()
    )
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sensor-client").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn post_accepts_negative_values() {
        let cli = parse(&["post", "3", "-4.5"]);

        assert_eq!(cli.command, Command::Post { id: 3, value: -4.5 });
    }

    #[test]
    fn server_flag() {
        let cli = parse(&["--server", "http://sensors.local:8080/", "all"]);

        assert_eq!(cli.server, "http://sensors.local:8080/");
        assert_eq!(cli.command, Command::All);
    }

    #[test]
    fn describe_line() {
        let timestamp = "2025-03-01T12:00:00Z".parse().unwrap();
        let line = describe(&SensorView::new(1, 23.0, timestamp));

        assert_eq!(line, "   1  Sensor 1        23.00  2025-03-01T12:00:00+00:00");
    }
}
