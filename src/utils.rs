use std::fs::File;
use std::io::{BufRead,BufReader,BufWriter,Write};
use std::mem::MaybeUninit;
use std::path::Path;

use anyhow::{bail,Result};
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;


pub fn get_maxrss() -> f64 {
    let usage = unsafe {
        let mut usage = MaybeUninit::uninit();
        assert_eq!(libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()), 0);
        usage.assume_init()
    };
    usage.ru_maxrss as f64 / (1024.0 * 1024.0)
}


pub fn get_file_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    match path.extension() {
        Some(ext) if ext == "gz" => Ok(Box::new(BufReader::new(MultiGzDecoder::new(file)))),
        _ => Ok(Box::new(BufReader::new(file))),
    }
}


pub fn get_file_writer(path: &Path) -> Result<Box<dyn Write>> {
    let file = File::create(path)?;
    match path.extension() {
        Some(ext) if ext == "gz" => Ok(Box::new(BufWriter::new(GzEncoder::new(file, Compression::default())))),
        _ => Ok(Box::new(BufWriter::new(file))),
    }
}


pub fn check_dependencies(programs: &[&str]) -> Result<()> {
    for prog in programs {
        if which::which(prog).is_err() {
            bail!("missing {prog} dependency, please check your system PATH");
        }
    }
    Ok(())
}


#[inline(always)]
pub fn flip_strand(strand: u8) -> u8 {
    match strand {
        b'+' => b'-',
        b'-' => b'+',
        _ => panic!("invalid strand symbol: {}", strand as char),
    }
}
