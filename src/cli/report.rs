//! Printing results.

use log::error;

use crate::keystore::KeyInfo;
use crate::operation::{OperationResult, Response};
use crate::sync::{Delivered, SyncOutcome};

use super::args::OutputFormat;

/// Print a response to stdout.
///
/// Errors go to stderr in text mode.  In JSON mode the whole envelope is
/// printed either way.
pub fn print(response: &Response, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(response) {
            Ok(json) => println!("{json}"),
            Err(err) => error!("Could not serialize the response: {err}"),
        },
        OutputFormat::Text => {
            if let Some(msg) = &response.error_msg {
                eprintln!("Error: {msg}");
            }
            if let Some(result) = &response.result {
                print!("{}", text(result));
            }
        }
    }
}

/// Render a result as human readable text.
pub fn text(result: &OperationResult) -> String {
    let mut out = String::new();
    match result {
        OperationResult::Status {
            zone,
            in_sync,
            diff,
        } => {
            if *in_sync {
                out.push_str(&format!("{zone}: in sync\n"));
            } else {
                out.push_str(&format!("{zone}: {} changes needed\n", diff.len()));
                for line in diff.to_string().lines() {
                    out.push_str(&format!("  {line}\n"));
                }
            }
        }
        OperationResult::Sync(SyncOutcome::InSync) => {
            out.push_str("Delegation in sync, nothing sent\n");
        }
        OperationResult::Sync(SyncOutcome::Applied { diff, delivery }) => {
            out.push_str(&format!("Applied {} changes\n", diff.len()));
            for line in diff.to_string().lines() {
                out.push_str(&format!("  {line}\n"));
            }
            delivered(&mut out, delivery);
        }
        OperationResult::Dsync(target) => {
            out.push_str(&format!(
                "{} port {} (found at {})\n",
                target.name.fmt_with_dot(),
                target.port,
                target.owner.fmt_with_dot()
            ));
            for (rtype, scheme) in &target.entries {
                out.push_str(&format!("  accepts {rtype} via {scheme}\n"));
            }
            for addr in &target.addrs {
                out.push_str(&format!("  address {addr}\n"));
            }
        }
        OperationResult::Upload(delivery) => {
            out.push_str("Key uploaded\n");
            delivered(&mut out, delivery);
        }
        OperationResult::Rollover {
            delivery,
            states_updated,
        } => {
            out.push_str("Key rolled over\n");
            delivered(&mut out, delivery);
            if !states_updated {
                out.push_str("  warning: local key states were not updated\n");
            }
        }
        OperationResult::Key(key) => key_line(&mut out, key),
        OperationResult::Keys(keys) => {
            if keys.is_empty() {
                out.push_str("No keys\n");
            }
            for key in keys {
                key_line(&mut out, key);
            }
        }
        OperationResult::Exported { stem, record } => {
            out.push_str(&format!("; {stem}\n{record}\n"));
        }
        OperationResult::Deleted(key) => {
            out.push_str(&format!("Deleted {} key {}\n", key.owner, key.keyid));
        }
    }
    out
}

fn delivered(out: &mut String, delivery: &Delivered) {
    out.push_str(&format!(
        "  sent to {} after {} attempts, signed by {} key {}\n",
        delivery.server,
        delivery.attempts,
        delivery.signed.signer.fmt_with_dot(),
        delivery.signed.keyid
    ));
}

fn key_line(out: &mut String, key: &KeyInfo) {
    out.push_str(&format!(
        "{} key {} {} {:?} {}{}{}\n",
        key.owner,
        key.keyid,
        key.algorithm,
        key.kind,
        key.state,
        if key.validated { " validated" } else { "" },
        if key.trusted { " trusted" } else { "" },
    ));
}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use domain::base::Name;

    use crate::delegation::DelegationDiff;

    use super::*;

    #[test]
    fn status_text() {
        let name: Name<Vec<u8>> = "ns2.child.example.".parse().unwrap();
        let result = OperationResult::Status {
            zone: "child.example.".into(),
            in_sync: false,
            diff: DelegationDiff {
                ns_add: vec![name],
                ..Default::default()
            },
        };
        assert_eq!(
            text(&result),
            "child.example.: 1 changes needed\n  + NS ns2.child.example.\n"
        );

        let result = OperationResult::Keys(Vec::new());
        assert_eq!(text(&result), "No keys\n");
    }
}
