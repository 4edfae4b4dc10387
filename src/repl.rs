//! Interactive shell driving a running cluster.

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cluster::Cluster;
use crate::error::Result;

const HELP: &str = "commands: start | crash <id> | recover <id> | submit <input> | status | stop";

/// Read commands from stdin until `stop` or end of input.
pub async fn run(cluster: &Cluster) -> Result<()> {
    println!("raftq shell: {}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "start" => {
                cluster.start_all();
                println!("start broadcast to {} schedulers", cluster.snapshots().len());
            }
            "crash" => match parse_id(rest) {
                Some(id) => match cluster.crash(id) {
                    Ok(()) => println!("crash sent to scheduler {}", id),
                    Err(e) => eprintln!("{}", e),
                },
                None => eprintln!("usage: crash <scheduler-id>"),
            },
            "recover" => match parse_id(rest) {
                Some(id) => match cluster.recover(id) {
                    Ok(()) => println!("recover sent to scheduler {}", id),
                    Err(e) => eprintln!("{}", e),
                },
                None => eprintln!("usage: recover <scheduler-id>"),
            },
            "submit" => {
                if rest.is_empty() {
                    eprintln!("usage: submit <input>");
                } else if let Err(e) = cluster.submit(rest.to_string()).await {
                    eprintln!("{}", e);
                }
            }
            "status" => print_status(cluster),
            "stop" => break,
            other => eprintln!("unknown command {:?}, {}", other, HELP),
        }
    }

    Ok(())
}

fn parse_id(s: &str) -> Option<u64> {
    s.parse().ok()
}

fn print_status(cluster: &Cluster) {
    for snap in cluster.snapshots() {
        let flags = match (snap.is_started, snap.is_crashed) {
            (false, _) => " (not started)",
            (true, true) => " (crashed)",
            (true, false) => "",
        };
        println!(
            "scheduler {}: {} term={} leader={:?} commit={} log_len={}{}",
            snap.id,
            snap.role,
            snap.current_term,
            snap.leader_id,
            snap.commit_index,
            snap.log.len(),
            flags
        );
    }
}
