//! Command-line entry point.

use h2static::{Config, HttpServer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

fn usage() -> ! {
    eprintln!(
        "Usage: h2static [OPTIONS] <PORT> [<PRIVATE_KEY_FILE> <CERT_FILE>]\n\
         \n\
         Options:\n\
           -a, --address <ADDR>           bind address (default: all)\n\
           -d, --htdocs <DIR>             document root (default: ./)\n\
           -n, --workers <N>              worker threads (default: 1)\n\
           -v, --verbose                  per-session trace output\n\
               --no-tls                   cleartext HTTP/2\n\
               --padding <N>              pad frames by up to N bytes\n\
               --header-table-size <N>    advertise SETTINGS_HEADER_TABLE_SIZE\n\
               --stream-read-timeout <S>  per-stream read timeout (default: 60)\n\
               --stream-write-timeout <S> per-stream write timeout (default: 60)\n\
               --error-gzip               gzip error response bodies\n\
               --early-response           respond on request headers\n\
               --verify-client            request (unverified) client certs\n\
               --dh-param-file <FILE>     DH parameters (PEM)\n\
               --push <PATH=P1,P2,..>     push-promise map entry\n\
               --trailer <NAME:VALUE>     trailer field (repeatable)"
    );
    std::process::exit(2)
}

fn parse_args() -> Config {
    let mut config = Config::default();
    let mut positional: Vec<String> = Vec::new();
    let mut args = std::env::args().skip(1);

    fn value(args: &mut impl Iterator<Item = String>, opt: &str) -> String {
        match args.next() {
            Some(v) => v,
            None => {
                eprintln!("missing value for {}", opt);
                usage()
            }
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-a" | "--address" => config.address = Some(value(&mut args, &arg)),
            "-d" | "--htdocs" => config.htdocs = PathBuf::from(value(&mut args, &arg)),
            "-n" | "--workers" => {
                config.num_worker = value(&mut args, &arg).parse().unwrap_or_else(|_| usage())
            }
            "-v" | "--verbose" => config.verbose = true,
            "--no-tls" => config.no_tls = true,
            "--padding" => {
                config.padding = value(&mut args, &arg).parse().unwrap_or_else(|_| usage())
            }
            "--header-table-size" => {
                config.header_table_size =
                    Some(value(&mut args, &arg).parse().unwrap_or_else(|_| usage()))
            }
            "--stream-read-timeout" => {
                config.stream_read_timeout = Duration::from_secs(
                    value(&mut args, &arg).parse().unwrap_or_else(|_| usage()),
                )
            }
            "--stream-write-timeout" => {
                config.stream_write_timeout = Duration::from_secs(
                    value(&mut args, &arg).parse().unwrap_or_else(|_| usage()),
                )
            }
            "--error-gzip" => config.error_gzip = true,
            "--early-response" => config.early_response = true,
            "--verify-client" => config.verify_client = true,
            "--dh-param-file" => {
                config.dh_param_file = Some(PathBuf::from(value(&mut args, &arg)))
            }
            "--push" => {
                let entry = value(&mut args, &arg);
                let Some((path, pushes)) = entry.split_once('=') else {
                    usage()
                };
                config.push.insert(
                    path.to_string(),
                    pushes.split(',').map(str::to_string).collect(),
                );
            }
            "--trailer" => {
                let entry = value(&mut args, &arg);
                let Some((name, val)) = entry.split_once(':') else {
                    usage()
                };
                config
                    .trailer
                    .push((name.trim().to_string(), val.trim().to_string()));
            }
            "-h" | "--help" => usage(),
            _ => positional.push(arg),
        }
    }

    match positional.len() {
        1 if config.no_tls => {}
        3 => {
            config.private_key_file = Some(PathBuf::from(&positional[1]));
            config.cert_file = Some(PathBuf::from(&positional[2]));
        }
        _ => usage(),
    }
    config.port = positional[0].parse().unwrap_or_else(|_| usage());
    config
}

fn main() -> ExitCode {
    env_logger::init();
    let config = parse_args();

    let mut server = match HttpServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = server.bind() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
