use anyhow::Result;

fn main() -> Result<()> {
    let json = warden::api::openapi()?;
    println!("{json}");
    Ok(())
}
