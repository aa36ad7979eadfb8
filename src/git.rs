//! Inspeção do repositório git via libgit2 para os metadados do bundle.
//!
//! O [`GitManager`] localiza o repositório que contém `repo_root` e expõe o
//! commit de HEAD, a branch atual e se a árvore de trabalho está suja.

use anyhow::{Context, Result};
use git2::{Repository, StatusOptions};
use serde::Serialize;
use std::path::Path;

/// Resumo do estado do repositório gravado em `bundle-metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoInfo {
    pub head_sha: String,
    pub branch: String,
    pub dirty: bool,
}

/// Gerenciador de consultas git usando a biblioteca libgit2.
pub struct GitManager {
    repo: Repository,
}

impl GitManager {
    /// Procura um repositório git a partir do caminho fornecido, subindo diretórios.
    pub fn discover(path: &Path) -> Result<Self> {
        let repo = Repository::discover(path).context("failed to discover git repository")?;
        Ok(Self { repo })
    }

    /// Retorna o hash curto (7 caracteres) do commit em HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let commit = self.repo.head()?.peel_to_commit()?;
        let full = commit.id().to_string();
        Ok(full[..7.min(full.len())].to_string())
    }

    /// Retorna o nome da branch atual.
    pub fn current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        let name = head
            .shorthand()
            .context("branch name is not valid UTF-8")?
            .to_string();
        Ok(name)
    }

    /// Indica se há alterações não commitadas (arquivos ignorados não contam).
    pub fn is_dirty(&self) -> Result<bool> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        Ok(!statuses.is_empty())
    }

    pub fn info(&self) -> Result<RepoInfo> {
        Ok(RepoInfo {
            head_sha: self.head_sha()?,
            branch: self.current_branch()?,
            dirty: self.is_dirty()?,
        })
    }
}

/// Informações do repositório em `path`, ou `None` fora de um repositório git.
pub fn repo_info(path: &Path) -> Option<RepoInfo> {
    GitManager::discover(path)
        .and_then(|gm| gm.info())
        .map_err(|err| tracing::debug!(path = %path.display(), error = %err, "no git metadata"))
        .ok()
}
