use cdiutils::sector::CdImage;
use cdiutils::volume::Volume;
use std::error::Error;

fn print_date(label: &str, date: Option<cdiutils::byte_reader::DiscDate>) {
    match date {
        Some(d) => println!(
            "  {label}: {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            d.year, d.month, d.day, d.hour, d.minute, d.second
        ),
        None => println!("  {label}: (none)"),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let disc_path = std::env::args().nth(1).unwrap_or_else(|| "disc.cdi".into());

    println!("Opening disc: {}", disc_path);
    let image = CdImage::open(&disc_path)?;
    println!("Framed with CD headers: {}", image.with_cd_headers());

    let volume = Volume::open(&image)?;
    let label = volume.standard_label();

    println!("\nStandard Disc Label:");
    println!("  standard_id:   {}", label.standard_id);
    println!("  system_id:     {}", label.system_id);
    println!("  volume_id:     {}", label.volume_id);
    println!("  volume_size:   {} blocks", label.volume_size);
    println!("  app_id:        {}", label.app_id);
    println!("  publisher_id:  {}", label.publisher_id);
    println!("  path_table:    address={} size={}", label.path_table_address, label.path_table_size);
    print_date("created_date", label.created_date);
    print_date("modified_date", label.modified_date);

    println!("\nblock_offset: {}", volume.block_offset());
    println!("path table entries: {}", volume.path_table().entries().len());

    Ok(())
}
