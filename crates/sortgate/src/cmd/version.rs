use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("sortgate {}", env!("CARGO_PKG_VERSION"));
    if !args.extended {
        return Ok(SUCCESS);
    }

    println!(
        "target: {}",
        option_env!("SORTGATE_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("SORTGATE_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("os: {}", std::env::consts::OS);
    println!("arch: {}", std::env::consts::ARCH);
    println!("default_baud: {}", sortgate_transport::DEFAULT_BAUD_RATE);
    println!(
        "default_categories: {}",
        sortgate_frame::CategorySet::default()
    );

    Ok(SUCCESS)
}
