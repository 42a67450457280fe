//! `vsfsjournal` stages and replays write-ahead-logged mutations against a fixed-layout disk
//! image: `create <filename>` appends a file-creation transaction to the journal, `install`
//! replays every committed transaction onto the image and truncates the journal.

mod blockio;
mod error;
mod journal;
mod layout;
mod mkimage;
mod replay;
mod stage;

use std::env;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::exit;

use blockio::Image;

/// The image file name used when none is given on the command line.
const DEFAULT_IMAGE: &str = "vsfs.img";

/// Structure storing command line arguments.
struct Args {
	/// The name of the current program used in command line.
	prog: String,
	/// If true, print command line help.
	help: bool,
	/// The path to the disk image.
	image_path: PathBuf,
	/// The requested subcommand, if any.
	command: Option<Command>,
}

enum Command {
	/// `create <filename>`
	Create {
		filename: String,
	},
	/// `install`
	Install,
	/// `mkimage` — formats a fresh image; see [`mkimage`].
	MkImage,
}

fn parse_args() -> Args {
	let mut iter = env::args();
	let prog = iter.next().unwrap_or_else(|| "vsfsjournal".to_owned());

	let mut help = false;
	let mut image_path = None;
	let mut command = None;

	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"-h" | "--help" => help = true,
			"-f" | "--image" => {
				image_path = iter.next().map(PathBuf::from);
			},
			"create" => {
				let filename = iter.next().unwrap_or_else(|| {
					eprintln!("{prog}: create: specify a filename");
					exit(1);
				});
				command = Some(Command::Create {
					filename,
				});
			},
			"install" => command = Some(Command::Install),
			"mkimage" => command = Some(Command::MkImage),

			other => {
				eprintln!("{prog}: unrecognized argument `{other}`");
				exit(1);
			},
		}
	}

	Args {
		prog,
		help,
		image_path: image_path.unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE)),
		command,
	}
}

fn print_help(prog: &str) {
	println!("Usage:");
	println!(" {prog} [-f <image>] create <filename>");
	println!(" {prog} [-f <image>] install");
	println!(" {prog} [-f <image>] mkimage");
	println!();
	println!("Options:");
	println!(" -h, --help:          print this help");
	println!(" -f, --image <path>:  path to the disk image (default: {DEFAULT_IMAGE})");
}

fn main() {
	let args = parse_args();

	if args.help {
		print_help(&args.prog);
		return;
	}

	let command = args.command.unwrap_or_else(|| {
		eprintln!("{}: specify a command (create, install, mkimage)", args.prog);
		print_help(&args.prog);
		exit(1);
	});

	// `mkimage` creates the file it formats; every other command expects it to already exist.
	if let Command::MkImage = command {
		let mut file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(true)
			.open(&args.image_path)
			.unwrap_or_else(|e| {
				eprintln!("{}: {}: {}", args.prog, args.image_path.display(), e);
				exit(1);
			});
		mkimage::format(&mut file).unwrap_or_else(|e| {
			eprintln!("{}: failed to format {}: {}", args.prog, args.image_path.display(), e);
			exit(1);
		});
		println!("{}: formatted", args.image_path.display());
		return;
	}

	let file = open_image(&args);
	let mut image = Image::new(file);

	match command {
		Command::Create {
			filename,
		} => {
			let staged = stage::create(&mut image, &filename).unwrap_or_else(|e| {
				eprintln!("{}: failed to stage `{}`: {}", args.prog, filename, e);
				exit(1);
			});
			println!(
				"Successfully logged creation of file '{filename}' (inode {}) to journal.",
				staged.inode
			);
			println!("Run '{} install' to commit changes to disk.", args.prog);
		},
		Command::Install => {
			let outcome = replay::install(&mut image).unwrap_or_else(|e| {
				eprintln!("{}: install failed: {}", args.prog, e);
				exit(1);
			});
			match outcome {
				replay::Outcome::NotInitialized => {
					println!("Journal not initialized or corrupt. Nothing to install.");
				},
				replay::Outcome::Empty => {
					println!("Journal is empty.");
				},
				replay::Outcome::Replayed {
					committed,
				} => {
					println!("Install complete. {committed} transactions replayed.");
				},
			}
		},
		Command::MkImage => unreachable!("handled above"),
	}
}

fn open_image(args: &Args) -> File {
	OpenOptions::new().read(true).write(true).open(&args.image_path).unwrap_or_else(|e| {
		eprintln!("{}: {}: {}", args.prog, args.image_path.display(), e);
		eprintln!("Make sure you run `{} mkimage` first to create the disk image.", args.prog);
		exit(1);
	})
}
