use std::fmt::Write as _;

use trawler_core::store::Account;

use crate::{AccountAddArgs, AppContext, Result, TextRender};

pub fn add(context: &AppContext, args: &AccountAddArgs) -> Result<Account> {
    Ok(context.store.add_account(
        &context.vault,
        &args.platform,
        &args.username,
        &args.password,
    )?)
}

pub fn list(context: &AppContext) -> Result<Vec<Account>> {
    Ok(context.store.list_accounts()?)
}

impl TextRender for Account {
    fn text(&self) -> String {
        format!("#{} {} @ {}", self.id, self.username, self.platform)
    }
}

impl TextRender for Vec<Account> {
    fn text(&self) -> String {
        if self.is_empty() {
            return "no accounts stored".to_string();
        }
        let mut out = String::new();
        for account in self {
            let _ = writeln!(out, "{}", account.text());
        }
        out.trim_end().to_string()
    }
}
