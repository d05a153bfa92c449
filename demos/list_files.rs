use cdiutils::sector::CdImage;
use cdiutils::volume::Volume;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let disc_path = std::env::args().nth(1).unwrap_or_else(|| "disc.cdi".into());

    println!("Opening disc: {}", disc_path);
    let image = CdImage::open(&disc_path)?;
    let volume = Volume::open(&image)?;

    println!(
        "Volume: {} ({} blocks)",
        volume.standard_label().volume_id,
        volume.standard_label().volume_size
    );

    for entry in volume.path_table().entries() {
        let directory = volume.directory(entry)?;
        println!("\n{}:", volume.path_table().full_name(entry));
        for file in directory.contents() {
            if file.is_directory(volume.path_table()) {
                println!("  DIR:  {}", file.name);
            } else {
                println!("  FILE: {} ({} bytes, file_number={})", file.name, file.size, file.file_number);
            }
        }
    }

    Ok(())
}
