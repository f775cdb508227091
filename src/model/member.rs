use serenity::model::id::{ChannelId, RoleId, UserId};

/// Vista de un miembro del guild que entrega la capa de comandos
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: UserId,
    pub bot: bool,
    pub self_deaf: bool,
    pub manage_guild: bool,
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            bot: false,
            self_deaf: false,
            manage_guild: false,
            roles: Vec::new(),
        }
    }

    pub fn bot(mut self) -> Self {
        self.bot = true;
        self
    }

    pub fn deafened(mut self, self_deaf: bool) -> Self {
        self.self_deaf = self_deaf;
        self
    }

    pub fn with_manage_guild(mut self) -> Self {
        self.manage_guild = true;
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    /// Cuenta como oyente: no es bot y no se ensordeció
    pub fn is_listening(&self) -> bool {
        !self.bot && !self.self_deaf
    }
}

/// Canal de voz al que se conecta una sesión
#[derive(Debug, Clone)]
pub struct VoiceChannel {
    pub id: ChannelId,
    pub members: Vec<Member>,
}

impl VoiceChannel {
    pub fn new(id: ChannelId, members: Vec<Member>) -> Self {
        Self { id, members }
    }
}
