//! Version subcommand implementation

pub fn run() {
    println!("chunkmux {}", env!("CARGO_PKG_VERSION"));
    println!(
        "protocol: HTTP/1.1 chunked tunnels, frames O/D/H/C/A/E, max chunk {} bytes",
        chunkmux_common::SessionConfig::default().max_chunk_size
    );

    #[cfg(target_os = "linux")]
    println!("target: linux");
    #[cfg(target_os = "macos")]
    println!("target: macos");
    #[cfg(target_os = "windows")]
    println!("target: windows");
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    println!("target: unknown");
}
