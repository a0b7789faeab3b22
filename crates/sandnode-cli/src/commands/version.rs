use miette::Result;
use sandnode_core::version::version_string;

pub fn run() -> Result<()> {
    println!("{}", version_string());
    Ok(())
}
