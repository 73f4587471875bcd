//! bookdrop - find ebooks, add page numbers and send them to a Kindle

mod shell;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use log::LevelFilter;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use bookdrop::archive::{DEFAULT_API_HOST, DEFAULT_API_URL};
use bookdrop::mail::DEFAULT_SMTP_PORT;
use bookdrop::pages::{self, DEFAULT_WORDS_PER_PAGE, PageSource};
use bookdrop::workflow::{self, ConversionStatus, PageStatus, PrepareOptions, PreparedBook};
use bookdrop::{
    ApiSettings, ArchiveClient, BookArchive, BookFormat, BookSummary, ConfigStore, Conversion,
    Converter, Error, PaginationOptions, Result, SearchQuery, SmtpMailer, SmtpSettings, config,
};

/// Results shown for a search.
const DEFAULT_RESULTS: usize = 5;

#[derive(Parser)]
#[command(name = "bookdrop")]
#[command(version, about = "Find ebooks, add page numbers and send them to a Kindle", long_about = None)]
#[command(after_help = "EXAMPLES:
    bookdrop search dune                     List matching books
    bookdrop send dune --paginated           Send the first result with real page numbers
    bookdrop paginate book.epub              Add approximate page numbers in place
    bookdrop deliver book.epub --azw3        Convert and mail a local file
    bookdrop                                 Start the interactive shell")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file [default: <config dir>/bookdrop/config.json]
    #[arg(long, global = true, value_name = "PATH", env = "BOOKDROP_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(flatten)]
    smtp: SmtpArgs,

    #[command(flatten)]
    api: ApiArgs,
}

#[derive(Args, Clone)]
struct SmtpArgs {
    /// SMTP server used to send mail
    #[arg(long, global = true, env = "BOOKDROP_SMTP_SERVER")]
    smtp_server: Option<String>,

    #[arg(long, global = true, env = "BOOKDROP_SMTP_PORT", default_value_t = DEFAULT_SMTP_PORT)]
    smtp_port: u16,

    /// SMTP login [default: the sender address]
    #[arg(long, global = true, env = "BOOKDROP_SMTP_USER")]
    smtp_user: Option<String>,

    #[arg(long, global = true, env = "BOOKDROP_SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: Option<String>,

    /// Sender address (must be approved for the Kindle)
    #[arg(long, global = true, env = "BOOKDROP_FROM")]
    from: Option<String>,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Archive API key
    #[arg(long, global = true, env = "BOOKDROP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, global = true, env = "BOOKDROP_API_HOST", default_value = DEFAULT_API_HOST)]
    api_host: String,

    #[arg(long, global = true, env = "BOOKDROP_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[derive(Args, Clone, Copy)]
struct PrepareArgs {
    /// Do not add page numbers to books without them
    #[arg(long)]
    no_pages: bool,

    /// Convert EPUBs to AZW3 before sending
    #[arg(long)]
    azw3: bool,

    /// Words per synthetic page
    #[arg(long, default_value_t = DEFAULT_WORDS_PER_PAGE)]
    words_per_page: usize,
}

impl PrepareArgs {
    fn options(self) -> PrepareOptions {
        PrepareOptions {
            add_pages: !self.no_pages,
            convert_to_azw3: self.azw3,
            pagination: PaginationOptions::new(self.words_per_page),
        }
    }
}

#[derive(Args, Clone)]
struct QueryArgs {
    /// Title, author or other search text
    #[arg(required = true, num_args = 1.., value_name = "QUERY")]
    query: Vec<String>,

    /// File format: epub or pdf
    #[arg(short, long, default_value = "epub")]
    format: BookFormat,

    /// Which search result to take (1-based)
    #[arg(short = 'n', long, default_value_t = 1)]
    choice: usize,

    /// Take the first EPUB result that already has page numbers
    #[arg(long, conflicts_with = "choice")]
    paginated: bool,

    /// Download directory
    #[arg(short = 'o', long, default_value = ".")]
    dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Search the archive
    Search {
        #[arg(required = true, num_args = 1.., value_name = "QUERY")]
        query: Vec<String>,

        #[arg(short, long, default_value = "epub")]
        format: BookFormat,

        /// Number of results to show
        #[arg(short, long, default_value_t = DEFAULT_RESULTS)]
        limit: usize,
    },
    /// Download a book
    Download {
        #[command(flatten)]
        query: QueryArgs,
    },
    /// Download a book, prepare it and mail it to the Kindle
    Send {
        #[command(flatten)]
        query: QueryArgs,

        #[command(flatten)]
        prepare: PrepareArgs,

        /// Kindle address [default: from config]
        #[arg(long)]
        to: Option<String>,

        /// Keep the local file after sending
        #[arg(long)]
        keep: bool,
    },
    /// Prepare and mail a local file to the Kindle
    Deliver {
        file: PathBuf,

        #[command(flatten)]
        prepare: PrepareArgs,

        #[arg(long)]
        to: Option<String>,

        /// Delete the local file after a successful send
        #[arg(long)]
        remove: bool,
    },
    /// Show the page numbers EPUB files already have
    Pages {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Add approximate page numbers to an EPUB in place
    Paginate {
        file: PathBuf,

        #[arg(long, default_value_t = DEFAULT_WORDS_PER_PAGE)]
        words_per_page: usize,

        /// Paginate even if the book already has page numbers
        #[arg(long)]
        force: bool,
    },
    /// Convert an EPUB to AZW3 with Calibre
    Convert { file: PathBuf },
    /// Manage the Kindle address
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Interactive shell (the default)
    Shell,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Save the Kindle address
    SetEmail { email: String },
    /// Show the saved Kindle address
    Show,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let app = App {
        config_path: cli.config.clone().unwrap_or_else(config::default_path),
        smtp: cli.smtp.clone(),
        api: cli.api.clone(),
    };

    let result = match cli.command.unwrap_or(Command::Shell) {
        Command::Shell => shell::run(&app),
        command => app.run(command),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            app.error(&e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let config = ConfigBuilder::new().set_time_level(LevelFilter::Off).build();
    // A second logger is the only failure mode
    let _ = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto);
}

/// Settings shared by every command.
pub(crate) struct App {
    config_path: PathBuf,
    smtp: SmtpArgs,
    api: ApiArgs,
}

impl App {
    fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Search {
                query,
                format,
                limit,
            } => {
                let results = self.search(&query.join(" "), format)?;
                self.print_results(&results, limit);
                Ok(())
            }
            Command::Download { query } => {
                let path = self.fetch(&query)?;
                self.success(&format!("Downloaded to {}", path.display()));
                Ok(())
            }
            Command::Send {
                query,
                prepare,
                to,
                keep,
            } => {
                let recipient = self.recipient(to)?;
                let path = self.fetch(&query)?;
                self.send_file(&path, &recipient, prepare.options(), !keep)
            }
            Command::Deliver {
                file,
                prepare,
                to,
                remove,
            } => {
                let recipient = self.recipient(to)?;
                self.send_file(&file, &recipient, prepare.options(), remove)
            }
            Command::Pages { files } => {
                for file in files {
                    self.show_pages(&file);
                }
                Ok(())
            }
            Command::Paginate {
                file,
                words_per_page,
                force,
            } => self.paginate(&file, PaginationOptions::new(words_per_page), force),
            Command::Convert { file } => match Converter::locate().convert(&file)? {
                Conversion::Converted(output) => {
                    self.success(&format!("Converted to {}", output.display()));
                    Ok(())
                }
                Conversion::Unavailable => Err(converter_missing()),
            },
            Command::Config { command } => match command {
                ConfigCommand::SetEmail { email } => self.set_email(&email),
                ConfigCommand::Show => self.show_email(),
            },
            Command::Shell => shell::run(self),
        }
    }

    pub(crate) fn archive(&self) -> Result<ArchiveClient> {
        let api_key = self
            .api
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("archive API key not set (--api-key or BOOKDROP_API_KEY)".into()))?;
        ArchiveClient::new(ApiSettings {
            api_key,
            api_host: self.api.api_host.clone(),
            base_url: self.api.api_url.clone(),
        })
    }

    pub(crate) fn mailer(&self) -> Result<SmtpMailer> {
        let server = self
            .smtp
            .smtp_server
            .clone()
            .ok_or_else(|| Error::Config("SMTP server not set (--smtp-server or BOOKDROP_SMTP_SERVER)".into()))?;
        let from = self
            .smtp
            .from
            .clone()
            .ok_or_else(|| Error::Config("sender address not set (--from or BOOKDROP_FROM)".into()))?;
        SmtpMailer::new(SmtpSettings {
            server,
            port: self.smtp.smtp_port,
            username: self.smtp.smtp_user.clone().unwrap_or_default(),
            password: self.smtp.smtp_password.clone().unwrap_or_default(),
            from,
        })
    }

    pub(crate) fn config(&self) -> Result<ConfigStore> {
        ConfigStore::load(&self.config_path)
    }

    /// The explicit address, else the saved one.
    pub(crate) fn recipient(&self, explicit: Option<String>) -> Result<String> {
        if let Some(to) = explicit {
            return Ok(to);
        }
        self.config()?
            .kindle_email()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Config("Kindle email not set; run `bookdrop config set-email <ADDRESS>`".into())
            })
    }

    pub(crate) fn search(&self, query: &str, format: BookFormat) -> Result<Vec<BookSummary>> {
        let results = self.archive()?.search(&SearchQuery::new(query, format))?;
        if results.is_empty() {
            return Err(Error::NotFound(format!("no books found for {query:?}")));
        }
        Ok(results)
    }

    pub(crate) fn print_results(&self, results: &[BookSummary], limit: usize) {
        for (i, book) in results.iter().take(limit).enumerate() {
            println!("{}. {}", (i + 1).to_string().bold(), book);
        }
    }

    /// Search and download according to `query`.
    fn fetch(&self, query: &QueryArgs) -> Result<PathBuf> {
        let text = query.query.join(" ");
        let archive = self.archive()?;
        let results = self.search(&text, query.format)?;

        if query.paginated {
            if query.format != BookFormat::Epub {
                return Err(Error::InvalidOption("--paginated only applies to EPUB".into()));
            }
            let candidates = &results[..results.len().min(DEFAULT_RESULTS)];
            println!("Checking {} candidates for page numbers...", candidates.len());
            return match workflow::find_paginated(&archive, candidates, &query.dir)? {
                Some((book, path)) => {
                    println!("Found {}", book);
                    Ok(path)
                }
                None => Err(Error::NotFound(format!(
                    "none of the top {} results has page numbers",
                    candidates.len()
                ))),
            };
        }

        let book = query
            .choice
            .checked_sub(1)
            .and_then(|i| results.get(i))
            .ok_or_else(|| {
                Error::InvalidOption(format!("choice must be between 1 and {}", results.len()))
            })?;
        println!("Downloading {}", book);
        workflow::download_book(&archive, book, query.format, &query.dir)
    }

    /// Prepare `path` and mail it; the file is kept if sending fails.
    pub(crate) fn send_file(
        &self,
        path: &Path,
        recipient: &str,
        options: PrepareOptions,
        remove_after: bool,
    ) -> Result<()> {
        options.pagination.validate()?;
        let mailer = self.mailer()?;
        let converter = options.convert_to_azw3.then(Converter::locate);
        let prepared = workflow::prepare_for_kindle(path, &options, converter.as_ref())?;
        self.report_prepared(&prepared);

        println!("Sending {} to {}...", prepared.path.display(), recipient);
        match workflow::deliver_prepared(&mailer, recipient, &prepared, remove_after) {
            Ok(()) => {
                self.success("Book sent to Kindle!");
                if remove_after {
                    println!("Deleted {} from local directory.", prepared.path.display());
                }
                Ok(())
            }
            Err(e) => {
                println!("Kept {} for another try.", prepared.path.display());
                Err(e)
            }
        }
    }

    pub(crate) fn report_prepared(&self, prepared: &PreparedBook) {
        match prepared.pages {
            PageStatus::Existing(count) => println!("Book already has {count} pages."),
            PageStatus::Added(count) => self.success(&format!("Added {count} pages.")),
            PageStatus::TooShort => self.warning("Book is too short for page numbers."),
            PageStatus::Missing => self.warning("Book has no page numbers."),
            PageStatus::NotEpub => {}
        }
        match &prepared.conversion {
            ConversionStatus::NotRequested => {}
            ConversionStatus::Converted(path) => {
                self.success(&format!("Converted to {}", path.display()))
            }
            ConversionStatus::Unavailable => {
                self.warning(&converter_missing().to_string());
                println!("Sending the EPUB instead.");
            }
            ConversionStatus::Failed(message) => {
                self.warning(&format!("Conversion failed: {message}"));
                println!("Sending the EPUB instead.");
            }
        }
    }

    pub(crate) fn show_pages(&self, file: &Path) {
        let package = match bookdrop::EpubPackage::open(file) {
            Ok(package) => package,
            Err(e) => {
                self.warning(&format!("{}: {}", file.display(), e));
                return;
            }
        };
        match pages::find_page_source(&package) {
            Some((source, count)) => {
                let from = match source {
                    PageSource::Navigation => "EPUB 3 page-list",
                    PageSource::Ncx => "NCX pageList",
                    PageSource::Markers => "pagebreak markers",
                };
                println!("{}: {} pages ({})", file.display(), count.to_string().green(), from);
            }
            None => println!("{}: {}", file.display(), "no page numbers".red()),
        }
    }

    pub(crate) fn paginate(&self, file: &Path, options: PaginationOptions, force: bool) -> Result<()> {
        options.validate()?;
        if !force && pages::has_page_list_at(file) {
            println!(
                "{} already has {} pages; use --force to paginate anyway.",
                file.display(),
                pages::page_count_at(file)
            );
            return Ok(());
        }
        match pages::add_pages(file, &options)? {
            0 => self.warning("Book is too short for page numbers; nothing changed."),
            count => self.success(&format!("Added {count} pages to {}", file.display())),
        }
        Ok(())
    }

    pub(crate) fn set_email(&self, email: &str) -> Result<()> {
        let mut config = self.config()?;
        config.set_kindle_email(email)?;
        config.save()?;
        self.success("Kindle email saved!");
        Ok(())
    }

    pub(crate) fn show_email(&self) -> Result<()> {
        match self.config()?.kindle_email() {
            Some(email) => println!("Kindle email: {email}"),
            None => self.warning("Kindle email not set."),
        }
        Ok(())
    }

    pub(crate) fn success(&self, message: &str) {
        println!("{}", message.green());
    }

    pub(crate) fn warning(&self, message: &str) {
        println!("{}", message.yellow());
    }

    pub(crate) fn error(&self, error: &Error) {
        eprintln!("{} {}", "error:".red().bold(), error);
    }
}

fn converter_missing() -> Error {
    Error::NotFound(
        "Calibre's ebook-convert not found; install Calibre from https://calibre-ebook.com/download"
            .into(),
    )
}
