use hfsread::{CacheOptions, CatalogEntry, CatalogRecord, Error, FileSource, ForkType, Volume, VolumeOptions};
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};

const USAGE: &str = "usage: read /path/to/file.img [/path/in/volume] [--extract <out>] [--resource]";

struct Args {
    image: String,
    path: Option<String>,
    extract: Option<String>,
    fork: ForkType,
}

fn parse_args() -> Result<Args, Error> {
    let mut positional = Vec::new();
    let mut extract = None;
    let mut fork = ForkType::Data;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--resource" => fork = ForkType::Resource,
            "--extract" => extract = Some(args.next().ok_or_else(|| usage("--extract needs a destination"))?),
            flag if flag.starts_with("--") => return Err(usage(&format!("unknown flag {flag}"))),
            other => positional.push(other.to_string()),
        }
    }

    let mut positional = positional.into_iter();
    let image = positional.next().ok_or_else(|| usage("missing image argument"))?;
    let path = positional.next();
    if positional.next().is_some() {
        return Err(usage("too many arguments"));
    }
    Ok(Args {
        image,
        path,
        extract,
        fork,
    })
}

fn usage(problem: &str) -> Error {
    eprintln!("{USAGE}");
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, problem.to_string()))
}

fn main() -> Result<(), Error> {
    let args = parse_args()?;
    println!("Operating on {}", args.image);

    let options = VolumeOptions::default().with_cache(CacheOptions::default());
    let volume = Volume::open_with(FileSource::open(&args.image)?, options)?;
    print_summary(&volume)?;

    let entry = match &args.path {
        Some(path) => volume
            .resolve_path(path)?
            .ok_or_else(|| Error::NotFound(path.clone()))?,
        None => volume.root()?,
    };

    match &entry.data {
        CatalogRecord::Folder(folder) => {
            println!();
            println!("{}", display_path(&volume, &args, &entry)?);
            for child in volume.list(folder.folder_id)? {
                let target = volume.resolve_link(&child)?;
                print_entry(&child, &target, args.fork);
            }
        }
        CatalogRecord::File(file) => {
            let copy = match &args.extract {
                Some(out) => {
                    let mut writer = BufWriter::new(File::create(out)?);
                    let copy = volume.extract_fork(file, args.fork, &mut writer)?;
                    writer.flush()?;
                    println!("Extracted to {out}");
                    copy
                }
                None => volume.extract_fork(file, args.fork, &mut io::sink())?,
            };
            println!("{} ({} fork)", display_path(&volume, &args, &entry)?, args.fork);
            println!("bytes: {}", copy.bytes);
            println!("sha256: {}", copy.sha256);
        }
        CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => {
            return Err(Error::NotFound(format!("file or folder at {:?}", args.path)));
        }
    }

    Ok(())
}

fn print_summary(volume: &Volume) -> Result<(), Error> {
    let header = volume.header();
    println!("Volume: {}", volume.name()?);
    println!("Kind: {:?}", volume.kind());
    println!("Block Size: {}", header.block_size);
    println!("Blocks: {} total, {} free", header.total_blocks, header.free_blocks);
    println!("Files: {}, Folders: {}", header.file_count, header.folder_count);
    Ok(())
}

/// The path as given, since a hard link's target lives in a private folder.
fn display_path(volume: &Volume, args: &Args, entry: &CatalogEntry) -> Result<String, Error> {
    match &args.path {
        Some(path) => Ok(path.clone()),
        None => volume.posix_path(entry),
    }
}

/// One listing line: the name of `entry` with the details of its link target.
fn print_entry(entry: &CatalogEntry, target: &CatalogEntry, fork: ForkType) {
    let name = entry.name().to_string().replace('/', ":");
    match &target.data {
        CatalogRecord::Folder(folder) => {
            println!("d {:>10} {:>12} {name}/", folder.folder_id, folder.valence);
        }
        CatalogRecord::File(file) => {
            println!("- {:>10} {:>12} {name}", file.file_id, file.fork(fork).logical_size);
        }
        CatalogRecord::FolderThread(_) | CatalogRecord::FileThread(_) => {}
    }
}
