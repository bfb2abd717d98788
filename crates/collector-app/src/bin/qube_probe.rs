//! One-shot register probe for bench-testing a heat pump endpoint.
//!
//! Reads a single register and prints both the raw words/bits and the
//! decoded value, so address maps and byte/word order can be verified
//! before the collector is pointed at a device.

use std::env;
use std::process;

use anyhow::{bail, Context as _, Result};

use modbus_client::{ClientConfig, ModbusClient};
use register_map::codec;
use register_map::{ByteOrder, DataType, Encoding, Region, WordOrder};

struct ProbeArgs {
    host: String,
    port: u16,
    unit_id: u8,
    address: u16,
    region: Region,
    data_type: DataType,
    encoding: Encoding,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            process::exit(2);
        }
    };

    let config = ClientConfig {
        host: args.host.clone(),
        port: args.port,
        ..ClientConfig::default()
    };
    let client = ModbusClient::connect(config)
        .await
        .with_context(|| format!("connect to {}:{}", args.host, args.port))?;

    println!(
        "probing {}:{} unit {} {} @ {} as {}",
        args.host,
        args.port,
        args.unit_id,
        args.region,
        args.address,
        args.data_type
    );

    if args.region.is_bit() {
        let bits = match args.region {
            Region::Coil => client.read_coils(args.unit_id, args.address, 1).await?,
            _ => {
                client
                    .read_discrete_inputs(args.unit_id, args.address, 1)
                    .await?
            }
        };
        let Some(&bit) = bits.first() else {
            bail!("device returned no data");
        };
        println!("raw: {bit}");
        println!("decoded: {:?}", codec::decode_bit(bit));
        return Ok(());
    }

    let count = args.data_type.word_count();
    let words = match args.region {
        Region::Holding => client.read_holding(args.unit_id, args.address, count).await?,
        _ => client.read_input(args.unit_id, args.address, count).await?,
    };
    let hex: Vec<String> = words.iter().map(|word| format!("0x{word:04X}")).collect();
    println!("raw: [{}]", hex.join(", "));

    let raw = codec::decode_words(args.data_type, args.encoding, &words)
        .context("decode register words")?;
    println!("decoded: {raw:?} ({})", raw.as_f64());
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<ProbeArgs> {
    let mut host = None;
    let mut port = 502u16;
    let mut unit_id = 1u8;
    let mut address = None;
    let mut region = Region::Input;
    let mut data_type = DataType::Uint16;
    let mut encoding = Encoding::default();

    while let Some(arg) = args.next() {
        let mut value_for = |name: &str| -> Result<String> {
            args.next().with_context(|| format!("{name} requires a value"))
        };
        match arg.as_str() {
            "--host" => host = Some(value_for("--host")?),
            "--port" => port = value_for("--port")?.parse().context("--port")?,
            "--unit" => unit_id = value_for("--unit")?.parse().context("--unit")?,
            "--address" => address = Some(value_for("--address")?.parse().context("--address")?),
            "--kind" => {
                region = value_for("--kind")?
                    .parse::<Region>()
                    .context("--kind must be input, holding, coil or discrete")?;
            }
            "--data-type" => {
                data_type = value_for("--data-type")?.parse::<DataType>().context("--data-type")?;
            }
            "--byte-order" => {
                encoding.byte_order =
                    value_for("--byte-order")?.parse::<ByteOrder>().context("--byte-order")?;
            }
            "--word-order" => {
                encoding.word_order =
                    value_for("--word-order")?.parse::<WordOrder>().context("--word-order")?;
            }
            "--help" | "-h" => {
                print_usage();
                process::exit(0);
            }
            other => bail!("unknown argument {other}"),
        }
    }

    let Some(host) = host else {
        bail!("--host is required");
    };
    let Some(address) = address else {
        bail!("--address is required");
    };
    if unit_id == 0 || unit_id > 247 {
        bail!("--unit must be between 1 and 247");
    }
    if region.is_bit() && !data_type.is_bit() {
        bail!("coil and discrete reads only support --data-type bool");
    }
    if !region.is_bit() && data_type.is_bit() {
        bail!("--data-type bool needs --kind coil or discrete");
    }

    Ok(ProbeArgs {
        host,
        port,
        unit_id,
        address,
        region,
        data_type,
        encoding,
    })
}

fn print_usage() {
    eprintln!("usage: qube-probe --host <addr> --address <reg> [options]");
    eprintln!();
    eprintln!("options:");
    eprintln!("  --host <addr>          device hostname or IP (required)");
    eprintln!("  --port <port>          TCP port (default 502)");
    eprintln!("  --unit <id>            Modbus unit id 1-247 (default 1)");
    eprintln!("  --address <reg>        register address (required)");
    eprintln!("  --kind <kind>          input | holding | coil | discrete (default input)");
    eprintln!("  --data-type <type>     bool | int16 | uint16 | int32 | uint32 | float32");
    eprintln!("  --byte-order <order>   big | little (default big)");
    eprintln!("  --word-order <order>   big | little (default big)");
}
