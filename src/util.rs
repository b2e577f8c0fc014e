use std::convert::TryInto;
use std::fmt::Debug;
use std::str::FromStr;

use log::{error, info};

use structopt::StructOpt;

pub use linux_embedded_hal::sysfs_gpio::Direction;
pub use linux_embedded_hal::{spidev, spidev::SpiModeFlags, Delay, Pin as Pindev, Spidev};

use simplelog::{LevelFilter, TermLogger, TerminalMode};

use ihex::{Reader, Record};

use dataflash::{Config, Delayed, Stripe};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error + 'static>>;

type Flash<const N: usize> = Stripe<Spidev, Pindev, Delayed<Delay>, N>;

#[derive(Debug, PartialEq, StructOpt)]
struct Options {
    #[structopt(subcommand)]
    operation: Operations,

    /// SPI device
    #[structopt(long, default_value = "/dev/spidev0.0", env = "SPI_DEV")]
    spi_dev: String,

    /// SPI baud rate
    #[structopt(long, default_value = "20000000", env = "SPI_BAUD")]
    spi_baud: u32,

    /// Chip Select (output) pins, one per chip in stripe order
    #[structopt(long = "cs-pin", default_value = "8", env = "CS_PIN", use_delimiter = true)]
    cs_pins: Vec<u64>,

    /// Chip variant (at45db041d, at45db081d, at45db161d, at45db161d-binary)
    #[structopt(long, default_value = "at45db161d", env = "DATAFLASH_VARIANT")]
    variant: Variant,

    /// Time between status polls while a chip is busy, in microseconds
    #[structopt(long, default_value = "100")]
    poll_interval_us: u32,

    /// Give up on a busy chip after this many milliseconds
    #[structopt(long, default_value = "60000")]
    timeout_ms: u32,

    /// Configure log level
    #[structopt(long, default_value = "info", env = "LOG_LEVEL")]
    log_level: LevelFilter,
}

#[derive(Debug, PartialEq, StructOpt)]
pub enum Operations {
    /// Read device information of every chip
    Info,
    /// Read data from the start of the stream
    Read {
        /// Length of the read in bytes
        #[structopt()]
        length: u32,
    },
    /// Write data as a new stream, starting at page 0 of every chip
    Write {
        // Data to write in hexadecimal
        #[structopt(long)]
        data: HexData,
    },
    /// Erase the first pages of the stream
    ErasePages {
        /// Number of pages to erase, over all chips
        #[structopt(long, default_value = "1")]
        count: u32,
    },
    /// Erase the first sectors of the stream
    EraseSectors {
        /// Number of sectors to erase, over all chips
        #[structopt(long, default_value = "1")]
        count: u32,
    },
    /// Dump the start of the stream into a hex file
    Dump {
        /// Length of the read in bytes
        #[structopt()]
        length: u32,

        /// Output ihex file
        #[structopt(long, default_value = "dump.ihex")]
        file: String,
    },
    /// Write a hex file as a new stream
    Load {
        /// Input ihex file
        file: String,
    },
    /// Erase all data on every chip
    EraseAll,
}

#[derive(Debug, PartialEq)]
pub struct HexData(Vec<u8>);

impl FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Variant(Config);

impl FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let config = match s.to_ascii_lowercase().as_str() {
            "at45db041d" => Config::AT45DB041D,
            "at45db081d" => Config::AT45DB081D,
            "at45db161d" => Config::AT45DB161D,
            "at45db161d-binary" => Config::AT45DB161D_BINARY,
            other => return Err(format!("unknown variant `{}`", other)),
        };
        Ok(Variant(config))
    }
}

fn fail<E: Debug>(e: E) -> Box<dyn std::error::Error + 'static> {
    format!("{:?}", e).into()
}

fn main() -> Result<()> {
    // Load options
    let opts = Options::from_args();

    // Setup logging
    TermLogger::init(opts.log_level, simplelog::Config::default(), TerminalMode::Mixed)?;

    // Connect and configure SPI device
    let mut spi = Spidev::open(&opts.spi_dev)?;

    let mut spi_config = spidev::SpidevOptions::new();
    spi_config.mode(SpiModeFlags::SPI_MODE_0 | SpiModeFlags::SPI_NO_CS);
    spi_config.max_speed_hz(opts.spi_baud);
    spi.configure(&spi_config)?;

    // Connect and configure GPIO pins, deselected
    let mut pins = Vec::with_capacity(opts.cs_pins.len());
    for &number in &opts.cs_pins {
        let pin = Pindev::new(number);
        pin.export()?;
        pin.set_direction(Direction::High)?;
        pins.push(pin);
    }

    let wait = Delayed::with_timeout(
        Delay,
        opts.poll_interval_us,
        opts.timeout_ms.saturating_mul(1000),
    );

    let result = match pins.len() {
        1 => run::<1>(&opts, spi, wait, pins),
        2 => run::<2>(&opts, spi, wait, pins),
        3 => run::<3>(&opts, spi, wait, pins),
        4 => run::<4>(&opts, spi, wait, pins),
        n => Err(format!("expected 1 to 4 chip-select pins, got {}", n).into()),
    };
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

fn run<const N: usize>(
    opts: &Options,
    spi: Spidev,
    wait: Delayed<Delay>,
    pins: Vec<Pindev>,
) -> Result<()> {
    let pins: [Pindev; N] = pins
        .try_into()
        .map_err(|_| "chip-select pin count mismatch")?;
    let config = opts.variant.0;

    // Instantiate the chips
    let mut flash: Flash<N> = Stripe::init(spi, wait, pins, config).map_err(fail)?;

    // Read out IDs to check we are connected
    for index in 0..N {
        if let Some((bus, chip)) = flash.bus_and_chip(index) {
            let id = chip.read_id(bus).map_err(fail)?;
            if id.mfr_code() == 0 {
                return Err(format!("chip {}: ID read failed ({:?})", index, id).into());
            }
            info!("Chip {}: {:?}", index, id);
        }
    }

    // Perform the requested operation
    match &opts.operation {
        Operations::Info => {
            for index in 0..N {
                if let Some((bus, chip)) = flash.bus_and_chip(index) {
                    let status = chip.read_status(bus).map_err(fail)?;
                    let mut security = [0u8; 128];
                    chip.read_security_register(bus, &mut security)
                        .map_err(fail)?;
                    info!("Chip {} status: {:?}", index, status);
                    info!("Chip {} security register: {}", index, hex::encode(&security[..]));
                }
            }
            let capacity =
                N as u64 * u64::from(config.page_count()) * u64::from(config.page_size());
            info!(
                "{} chips, {} byte pages, {} bytes in total",
                N,
                config.page_size(),
                capacity
            );
        }
        Operations::Read { length } => {
            info!("Reading {} bytes", length);

            let mut buff = vec![0u8; *length as usize];
            flash.read(&mut buff).map_err(fail)?;

            info!("Read: {:02x?}", buff);
        }
        Operations::Write { data } => {
            info!("Writing {} bytes", data.0.len());

            write_stream(&mut flash, &data.0)?;

            info!("Write complete");
        }
        Operations::ErasePages { count } => {
            info!("Erasing {} pages", count);

            flash.erase_pages(*count).map_err(fail)?;

            info!("Page erase complete");
        }
        Operations::EraseSectors { count } => {
            info!("Erasing {} sectors", count);

            flash.erase_sectors(*count).map_err(fail)?;

            info!("Sector erase complete");
        }
        Operations::EraseAll => {
            info!("Erasing all chips");

            flash.chip_erase_all().map_err(fail)?;

            info!("Full erase complete");
        }
        Operations::Dump { length, file } => {
            info!("Reading {} bytes to file {}", length, file);

            let mut buff = vec![0u8; *length as usize];
            flash.read(&mut buff).map_err(fail)?;

            let data = ihex::create_object_file_representation(&to_records(&buff)).map_err(fail)?;
            std::fs::write(file, data)?;

            info!("Dump complete");
        }
        Operations::Load { file } => {
            info!("Loading file {}", file);

            let text = std::fs::read_to_string(file)?;
            let image = from_records(&text)?;

            info!("Writing {} bytes", image.len());
            write_stream(&mut flash, &image)?;

            info!("Load complete");
        }
    }

    // A read that stopped mid-page still holds a chip-select.
    flash.abort().map_err(fail)?;
    let (_spi, _wait, pins) = flash.free();
    for pin in pins.iter() {
        pin.unexport()?;
    }
    Ok(())
}

fn write_stream<const N: usize>(flash: &mut Flash<N>, data: &[u8]) -> Result<()> {
    flash.start_sequential_write().map_err(fail)?;
    if let Err(e) = flash.write(data) {
        flash.abort().map_err(fail)?;
        return Err(fail(e));
    }
    flash.finish_sequential_write().map_err(fail)
}

/// Splits `data` into 32-byte data records, with an extended linear address
/// record at every 64 KiB boundary.
fn to_records(data: &[u8]) -> Vec<Record> {
    let mut records = Vec::new();
    let mut upper = None;
    for (c, chunk) in data.chunks(32).enumerate() {
        let address = c * 32;
        let segment = (address >> 16) as u16;
        if upper != Some(segment) {
            records.push(Record::ExtendedLinearAddress(segment));
            upper = Some(segment);
        }
        records.push(Record::Data {
            offset: address as u16,
            value: chunk.to_vec(),
        });
    }
    records.push(Record::EndOfFile);
    records
}

/// Assembles the records of an ihex file into one image starting at address
/// 0. Gaps are filled with `0xFF`.
fn from_records(text: &str) -> Result<Vec<u8>> {
    let mut image = Vec::new();
    let mut upper = 0usize;
    for record in Reader::new(text) {
        match record.map_err(fail)? {
            Record::Data { offset, value } => {
                let start = upper << 16 | usize::from(offset);
                let end = start + value.len();
                if image.len() < end {
                    image.resize(end, 0xFF);
                }
                image[start..end].copy_from_slice(&value);
            }
            Record::ExtendedLinearAddress(segment) => upper = usize::from(segment),
            Record::EndOfFile => break,
            other => return Err(format!("unrecognised record: {:?}", other).into()),
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_cross_64k() {
        let data: Vec<u8> = (0..0x10040usize).map(|i| i as u8).collect();
        let records = to_records(&data);
        assert_eq!(records[0], Record::ExtendedLinearAddress(0));
        assert!(records.contains(&Record::ExtendedLinearAddress(1)));
        assert_eq!(records.last(), Some(&Record::EndOfFile));

        let text = ihex::create_object_file_representation(&records).unwrap();
        assert!(from_records(&text).unwrap() == data);
    }

    #[test]
    fn gaps_are_erased() {
        let records = [
            Record::Data {
                offset: 4,
                value: vec![1, 2],
            },
            Record::EndOfFile,
        ];
        let text = ihex::create_object_file_representation(&records).unwrap();
        assert_eq!(from_records(&text).unwrap(), vec![0xFF, 0xFF, 0xFF, 0xFF, 1, 2]);
    }

    #[test]
    fn variants() {
        assert_eq!(
            "AT45DB161D-binary".parse::<Variant>(),
            Ok(Variant(Config::AT45DB161D_BINARY))
        );
        assert!("at45db321".parse::<Variant>().is_err());
    }
}
