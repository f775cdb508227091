use serenity::model::id::{RoleId, UserId};
use std::{collections::HashSet, fmt};
use tracing::{debug, info};

use crate::{
    error::{EngineError, Result},
    model::Member,
};

/// Acciones sujetas a votación
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteAction {
    Pause,
    Resume,
    Skip,
    Back,
    Shuffle,
    Stop,
}

impl fmt::Display for VoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Skip => "skip",
            Self::Back => "back",
            Self::Shuffle => "shuffle",
            Self::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Votos por acción de la sesión
#[derive(Debug, Default)]
pub struct Votes {
    pause: HashSet<UserId>,
    resume: HashSet<UserId>,
    skip: HashSet<UserId>,
    back: HashSet<UserId>,
    shuffle: HashSet<UserId>,
    stop: HashSet<UserId>,
}

impl Votes {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, action: VoteAction) -> &HashSet<UserId> {
        match action {
            VoteAction::Pause => &self.pause,
            VoteAction::Resume => &self.resume,
            VoteAction::Skip => &self.skip,
            VoteAction::Back => &self.back,
            VoteAction::Shuffle => &self.shuffle,
            VoteAction::Stop => &self.stop,
        }
    }

    fn set_mut(&mut self, action: VoteAction) -> &mut HashSet<UserId> {
        match action {
            VoteAction::Pause => &mut self.pause,
            VoteAction::Resume => &mut self.resume,
            VoteAction::Skip => &mut self.skip,
            VoteAction::Back => &mut self.back,
            VoteAction::Shuffle => &mut self.shuffle,
            VoteAction::Stop => &mut self.stop,
        }
    }

    pub fn count(&self, action: VoteAction) -> usize {
        self.set(action).len()
    }

    pub fn has_voted(&self, action: VoteAction, user: UserId) -> bool {
        self.set(action).contains(&user)
    }

    /// Resuelve el paso por la compuerta de una acción.
    ///
    /// Con `bypass` la acción pasa de inmediato. Si no, se registra el voto y
    /// la acción pasa cuando la cantidad de votantes distintos alcanza
    /// `required`. Cuando pasa, el conjunto de votos queda vacío.
    pub fn gate(
        &mut self,
        action: VoteAction,
        voter: UserId,
        bypass: bool,
        required: usize,
    ) -> Result<()> {
        if bypass {
            self.clear(action);
            return Ok(());
        }

        let set = self.set_mut(action);
        if !set.insert(voter) {
            return Err(EngineError::AlreadyVoted(action));
        }

        let votes = set.len();
        if votes < required {
            debug!("🗳️ Voto para {}: {}/{}", action, votes, required);
            return Err(EngineError::VoteRequired {
                action,
                votes,
                required,
            });
        }

        info!("🗳️ Votación aprobada para {} ({}/{})", action, votes, required);
        set.clear();
        Ok(())
    }

    pub fn clear(&mut self, action: VoteAction) {
        self.set_mut(action).clear();
    }

    /// Vacía todos los conjuntos (nuevo track o fin de la sesión)
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }
}

/// Votos requeridos para `listeners` miembros no-bot.
///
/// `ceil(n / 2)` para las acciones normales y `floor(n / 2)` para salir del
/// canal, con mínimo 1 en ambos casos.
pub fn required(listeners: usize, leave: bool) -> usize {
    let needed = if leave {
        listeners / 2
    } else {
        listeners.div_ceil(2)
    };
    needed.max(1)
}

/// Contexto de autorización de una sesión
#[derive(Debug, Clone, Copy)]
pub struct Authority<'a> {
    pub dj: UserId,
    pub dj_role: Option<RoleId>,
    pub vote_disabled: bool,
    pub members: &'a [Member],
}

impl Authority<'_> {
    /// Miembros no-bot del canal
    pub fn humans(&self) -> usize {
        self.members.iter().filter(|member| !member.bot).count()
    }

    pub fn required(&self, leave: bool) -> usize {
        required(self.humans(), leave)
    }

    /// DJ, administrador del servidor o único oyente no-bot del canal.
    /// Con un rol de DJ configurado solo cuentan el rol y el permiso de administrar.
    pub fn is_privileged(&self, member: &Member) -> bool {
        if member.manage_guild {
            return true;
        }

        match self.dj_role {
            Some(role) => member.has_role(role),
            None => {
                member.id == self.dj || (self.humans() == 1 && self.is_member(member.id))
            }
        }
    }

    /// La acción pasa sin votación
    pub fn bypasses(&self, member: &Member) -> bool {
        self.vote_disabled || self.is_privileged(member)
    }

    pub fn is_member(&self, user: UserId) -> bool {
        self.members.iter().any(|member| member.id == user)
    }
}
