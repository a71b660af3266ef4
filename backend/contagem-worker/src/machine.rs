use sysinfo::System;

/// Name of the machine running the worker, stamped as `Consumer` on every row.
///
/// Uses the OS host name; `COMPUTERNAME` / `HOSTNAME` only when the OS reports none.
pub fn machine_name() -> String {
    resolve(System::host_name(), |key| std::env::var(key).ok())
}

fn resolve<F>(host_name: Option<String>, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    host_name
        .into_iter()
        .chain(["COMPUTERNAME", "HOSTNAME"].into_iter().filter_map(|key| lookup(key)))
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
