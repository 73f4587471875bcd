//! Interactive command loop.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use colored::Colorize;

use bookdrop::workflow::{self, PrepareOptions};
use bookdrop::{BookFormat, BookSummary, Error, PaginationOptions, Result};

use crate::{App, DEFAULT_RESULTS};

const COMMANDS: &[(&str, &str)] = &[
    ("download", "Download a book"),
    ("send", "Download a book and send it to your Kindle"),
    ("pages", "Check or add page numbers in a local EPUB"),
    ("config", "Configure your Kindle email"),
    ("view", "View your current Kindle email"),
    ("help", "Show this help message"),
    ("exit", "Exit the program"),
];

/// Run until `exit` or end of input. Command errors are reported and the
/// loop continues.
pub fn run(app: &App) -> Result<()> {
    println!("Welcome to bookdrop!");
    help();

    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        let Some(command) = prompt(&mut input, "Enter a command: ")? else {
            return Ok(());
        };

        let result = match command.as_str() {
            "" => continue,
            "download" => download(app, &mut input).map(|_| ()),
            "send" => send(app, &mut input),
            "pages" => pages(app, &mut input),
            "config" => config(app, &mut input),
            "view" => app.show_email(),
            "help" => {
                help();
                Ok(())
            }
            "exit" | "quit" => {
                println!("Exiting program.");
                return Ok(());
            }
            other => {
                println!("{} {}", "Error: Command not recognized:".red(), other);
                Ok(())
            }
        };

        if let Err(e) = result {
            app.error(&e);
        }
    }
}

fn help() {
    println!("\n{}", "Commands:".bold());
    for (name, description) in COMMANDS {
        println!("{} - {}", name.blue(), description);
    }
}

/// Print `message` and read one trimmed line; `None` at end of input.
fn prompt(input: &mut impl BufRead, message: &str) -> Result<Option<String>> {
    print!("{message}");
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        println!();
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn prompt_required(input: &mut impl BufRead, message: &str) -> Result<String> {
    prompt(input, message)?
        .filter(|answer| !answer.is_empty())
        .ok_or_else(|| Error::InvalidOption("no answer given".into()))
}

fn confirm(input: &mut impl BufRead, message: &str) -> Result<bool> {
    let answer = prompt(input, &format!("{message} [y/N] "))?.unwrap_or_default();
    Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn choose<'a>(input: &mut impl BufRead, results: &'a [BookSummary]) -> Result<&'a BookSummary> {
    let shown = results.len().min(DEFAULT_RESULTS);
    let answer = prompt_required(input, "Which book would you like? ")?;
    answer
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=shown).contains(n))
        .map(|n| &results[n - 1])
        .ok_or_else(|| Error::InvalidOption(format!("pick a number between 1 and {shown}")))
}

fn download(app: &App, input: &mut impl BufRead) -> Result<PathBuf> {
    let title = prompt_required(input, "What book would you like to download? ")?;
    let format = if confirm(input, "PDF instead of EPUB?")? {
        BookFormat::Pdf
    } else {
        BookFormat::Epub
    };

    let results = app.search(&title, format)?;
    app.print_results(&results, DEFAULT_RESULTS);
    let archive = app.archive()?;
    let dir = Path::new(".");

    let path = if format == BookFormat::Epub
        && confirm(input, "Only accept books with real page numbers?")?
    {
        let candidates = &results[..results.len().min(DEFAULT_RESULTS)];
        match workflow::find_paginated(&archive, candidates, dir)? {
            Some((book, path)) => {
                println!("Found {}", book);
                path
            }
            None => {
                return Err(Error::NotFound(
                    "none of these books has page numbers".into(),
                ));
            }
        }
    } else {
        let book = choose(input, &results)?;
        workflow::download_book(&archive, book, format, dir)?
    };

    app.success("Download successful!");
    println!("Book downloaded to {}", path.display());
    Ok(path)
}

fn send(app: &App, input: &mut impl BufRead) -> Result<()> {
    let recipient = match app.recipient(None) {
        Ok(recipient) => recipient,
        Err(_) => {
            config(app, input)?;
            app.recipient(None)?
        }
    };

    let path = download(app, input)?;
    let options = PrepareOptions {
        add_pages: true,
        convert_to_azw3: confirm(input, "Convert to AZW3 first?")?,
        pagination: PaginationOptions::default(),
    };
    app.send_file(&path, &recipient, options, true)
}

fn pages(app: &App, input: &mut impl BufRead) -> Result<()> {
    let file = PathBuf::from(prompt_required(input, "Path to the EPUB: ")?);
    app.show_pages(&file);
    if !bookdrop::pages::has_page_list_at(&file)
        && file.is_file()
        && confirm(input, "Add approximate page numbers?")?
    {
        app.paginate(&file, PaginationOptions::default(), false)?;
    }
    Ok(())
}

fn config(app: &App, input: &mut impl BufRead) -> Result<()> {
    let email = prompt_required(input, "What is your Kindle email? ")?;
    app.set_email(&email)
}
