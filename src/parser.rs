use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, map_res, opt, recognize, value},
    multi::separated_list1,
    sequence::{delimited, preceded, tuple},
    IResult,
};
use uuid::Uuid;

use crate::model::{Filter, ImageType, Memory, MemoryUnit};

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Create { count: usize },
    CreateWithId { id: Uuid },
    CreateFromFile { path: String },
    Search { filter: Filter },
    Upload { laptop_id: Uuid, path: String, image_type: Option<ImageType> },
    Sample { path: String },
    Help,
    Exit,
}

#[derive(Debug, PartialEq, Clone)]
enum Condition {
    MaxPrice(f64),
    MinCores(u32),
    MinGhz(f64),
    MinRam(Memory),
}

// --- BASIC PARSERS ---

fn parse_float(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((digit1, opt(tuple((char('.'), digit1)))))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn parse_u32(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>())(input)
}

fn parse_u64(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

fn parse_uuid(input: &str) -> IResult<&str, Uuid> {
    let (input, uuid_str) = take_while(|c: char| c.is_ascii_hexdigit() || c == '-')(input)?;
    match Uuid::parse_str(uuid_str) {
        Ok(uuid) => Ok((input, uuid)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
    }
}

fn parse_quoted_uuid(input: &str) -> IResult<&str, Uuid> {
    delimited(opt(char('\'')), parse_uuid, opt(char('\'')))(input)
}

fn parse_memory_unit(input: &str) -> IResult<&str, MemoryUnit> {
    // Longest tokens first so "BIT" is not read as "B".
    alt((
        value(MemoryUnit::Bit, tag_ci("BIT")),
        value(MemoryUnit::Kilobyte, tag_ci("KB")),
        value(MemoryUnit::Megabyte, tag_ci("MB")),
        value(MemoryUnit::Gigabyte, tag_ci("GB")),
        value(MemoryUnit::Terabyte, tag_ci("TB")),
        value(MemoryUnit::Byte, tag_ci("B")),
    ))(input)
}

fn parse_image_type(input: &str) -> IResult<&str, ImageType> {
    alt((
        value(ImageType::Jpg, alt((tag_ci("JPEG"), tag_ci("JPG")))),
        value(ImageType::Png, tag_ci("PNG")),
    ))(input)
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

// --- FILTER CONDITIONS ---

fn parse_condition(input: &str) -> IResult<&str, Condition> {
    alt((
        map(preceded(tuple((ws(tag_ci("PRICE")), ws(tag("<=")))), parse_float), Condition::MaxPrice),
        map(preceded(tuple((ws(tag_ci("CORES")), ws(tag(">=")))), parse_u32), Condition::MinCores),
        map(preceded(tuple((ws(tag_ci("GHZ")), ws(tag(">=")))), parse_float), Condition::MinGhz),
        map(
            preceded(
                tuple((ws(tag_ci("RAM")), ws(tag(">=")))),
                tuple((parse_u64, ws(parse_memory_unit))),
            ),
            |(value, unit)| Condition::MinRam(Memory::new(value, unit)),
        ),
    ))(input)
}

fn build_filter(conditions: Vec<Condition>) -> Filter {
    let mut filter = Filter::default();
    for condition in conditions {
        match condition {
            Condition::MaxPrice(price) => filter.max_price_usd = price,
            Condition::MinCores(cores) => filter.min_cpu_cores = cores,
            Condition::MinGhz(ghz) => filter.min_cpu_ghz = ghz,
            Condition::MinRam(ram) => filter.min_ram = Some(ram),
        }
    }
    filter
}

// --- COMMAND PARSERS ---

fn parse_create(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("CREATE")(input)?;

    let with_id = map(
        preceded(tuple((multispace1, tag_ci("ID"), ws(char('=')))), parse_quoted_uuid),
        |id| Command::CreateWithId { id },
    );
    let from_file = map(
        preceded(tuple((multispace1, tag_ci("FROM"), multispace1)), parse_quoted_string),
        |path| Command::CreateFromFile { path },
    );
    let random = map(
        opt(preceded(multispace1, map_res(digit1, |s: &str| s.parse::<usize>()))),
        |count| Command::Create { count: count.unwrap_or(1) },
    );

    alt((with_id, from_file, random))(input)
}

fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, conditions) = opt(preceded(
        ws(tag_ci("WHERE")),
        separated_list1(ws(tag_ci("AND")), parse_condition),
    ))(input)?;

    Ok((input, Command::Search { filter: build_filter(conditions.unwrap_or_default()) }))
}

fn parse_upload(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("UPLOAD")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, laptop_id) = parse_quoted_uuid(input)?;
    let (input, _) = multispace1(input)?;
    let (input, path) = parse_quoted_string(input)?;
    let (input, image_type) = opt(preceded(ws(tag_ci("AS")), parse_image_type))(input)?;
    Ok((input, Command::Upload { laptop_id, path, image_type }))
}

fn parse_sample(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("SAMPLE")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, path) = parse_quoted_string(input)?;
    Ok((input, Command::Sample { path }))
}

fn parse_help(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("HELP")(input)?;
    Ok((input, Command::Help))
}

fn parse_exit(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("EXIT"), tag_ci("QUIT")))(input)?;
    Ok((input, Command::Exit))
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_create,
        parse_search,
        parse_upload,
        parse_sample,
        parse_help,
        parse_exit,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        },
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let context = if e.input.len() > 20 {
                format!("{}...", e.input.chars().take(20).collect::<String>())
            } else {
                e.input.to_string()
            };
            Err(format!("Invalid syntax near: '{}'", context))
        },
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "5f0c6a2e-8d52-4f6b-9a8e-2b7c1d3e4f50";

    #[test]
    fn create_variants() {
        assert_eq!(parse_command("create").unwrap(), Command::Create { count: 1 });
        assert_eq!(parse_command("CREATE 10").unwrap(), Command::Create { count: 10 });
        assert_eq!(
            parse_command(&format!("CREATE ID='{}'", ID)).unwrap(),
            Command::CreateWithId { id: Uuid::parse_str(ID).unwrap() }
        );
        assert_eq!(
            parse_command("CREATE FROM \"tmp/laptop.json\"").unwrap(),
            Command::CreateFromFile { path: "tmp/laptop.json".to_string() }
        );
    }

    #[test]
    fn search_with_all_thresholds() {
        let cmd = parse_command("SEARCH WHERE PRICE <= 2000 AND CORES >= 4 AND GHZ >= 2.2 AND RAM >= 16 GB").unwrap();
        assert_eq!(
            cmd,
            Command::Search {
                filter: Filter {
                    max_price_usd: 2000.0,
                    min_cpu_cores: 4,
                    min_cpu_ghz: 2.2,
                    min_ram: Some(Memory::gigabytes(16)),
                },
            }
        );
    }

    #[test]
    fn search_without_conditions_matches_all() {
        assert_eq!(parse_command("search").unwrap(), Command::Search { filter: Filter::default() });
        assert_eq!(
            parse_command("find where ram >= 512MB").unwrap(),
            Command::Search {
                filter: Filter {
                    min_ram: Some(Memory::new(512, MemoryUnit::Megabyte)),
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn upload_with_and_without_type() {
        let id = Uuid::parse_str(ID).unwrap();
        assert_eq!(
            parse_command(&format!("UPLOAD '{}' \"img/laptop.jpg\"", ID)).unwrap(),
            Command::Upload { laptop_id: id, path: "img/laptop.jpg".to_string(), image_type: None }
        );
        assert_eq!(
            parse_command(&format!("upload {} \"shot\" as png", ID)).unwrap(),
            Command::Upload { laptop_id: id, path: "shot".to_string(), image_type: Some(ImageType::Png) }
        );
    }

    #[test]
    fn misc_commands() {
        assert_eq!(parse_command("SAMPLE \"out.bin\"").unwrap(), Command::Sample { path: "out.bin".to_string() });
        assert_eq!(parse_command("  help ").unwrap(), Command::Help);
        assert_eq!(parse_command("quit").unwrap(), Command::Exit);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_command("SEARCH WHERE PRICE >= 10").is_err());
        assert!(parse_command("UPLOAD 'abc' \"x\"").is_err());
        assert!(parse_command("CREATE 3 laptops").is_err());
        assert!(parse_command("DROP TABLE laptops").is_err());
    }
}
