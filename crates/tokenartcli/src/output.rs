use std::fmt::Write;

use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Row, Table, cell, row};
use tokenart_service::resolver::ResolutionState;
use tokenart_service::tokens::{Token, UserTokens};
use tokenart_sources::{CandidateList, Identifier};

fn state_cells(state: &ResolutionState) -> (&'static str, String) {
    let label = match state {
        ResolutionState::Idle => "idle",
        ResolutionState::Resolving(_) => "resolving",
        ResolutionState::Resolved(_) => "resolved",
        ResolutionState::Exhausted => "fallback",
    };
    let url = state.url().map(|url| url.to_string()).unwrap_or_default();
    (label, url)
}

/// Formats candidate lists, one identifier per block.
pub fn format_candidates(candidates: &[(Identifier, CandidateList)]) -> String {
    let mut out = String::new();
    for (identifier, urls) in candidates {
        writeln!(out, "{identifier}").ok();
        if urls.is_empty() {
            writeln!(out, "  (unresolvable)").ok();
        }
        for (index, url) in urls.iter().enumerate() {
            writeln!(out, "  {}. {url}", index + 1).ok();
        }
    }
    out
}

pub fn print_candidates(candidates: &[(Identifier, CandidateList)]) {
    print!("{}", format_candidates(candidates));
}

pub fn print_resolutions(resolutions: &[(Identifier, ResolutionState)]) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Identifier", "State", "URL"]);

    for (identifier, state) in resolutions {
        let (label, url) = state_cells(state);
        table.add_row(row![identifier.as_str(), label, url]);
    }

    table.printstd();
}

fn token_row(token: &Token) -> Row {
    let mut row = Row::empty();
    row.add_cell(cell!(token.standard.to_string()));
    row.add_cell(cell!(token.name.as_deref().unwrap_or("")));
    row.add_cell(cell!(token.symbol.as_deref().unwrap_or("")));
    row.add_cell(cell!(token.address));
    row.add_cell(cell!(r->token.token_id));
    row.add_cell(cell!(r->token.amount));
    row
}

/// Prints a table of tokens.
///
/// If `artwork` is given, it holds the resolution of each token in the order of
/// [`UserTokens::iter`].
pub fn print_tokens(tokens: &UserTokens, artwork: Option<&[ResolutionState]>) {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    let mut titles = row![b => "Standard", "Name", "Symbol", "Address", "Token ID", "Amount"];
    if artwork.is_some() {
        titles.add_cell(cell!(b->"Artwork"));
    } else {
        titles.add_cell(cell!(b->"Image"));
    }
    table.set_titles(titles);

    for (index, token) in tokens.iter().enumerate() {
        let mut row = token_row(token);
        let image = match artwork.and_then(|artwork| artwork.get(index)) {
            Some(state) => {
                let (label, url) = state_cells(state);
                if url.is_empty() {
                    label.to_owned()
                } else {
                    url
                }
            }
            None => token
                .image
                .as_ref()
                .map(|image| image.to_string())
                .unwrap_or_default(),
        };
        row.add_cell(cell!(image));
        table.add_row(row);
    }

    table.printstd();
}
