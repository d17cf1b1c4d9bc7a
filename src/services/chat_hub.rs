// src/services/chat_hub.rs

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, RwLock};

use crate::models::chat::ChatMessageView;

/// Capacidade de cada canal. Um assinante mais lento que isso recebe `Lagged`.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Eventos do canal pessoal de um usuário (stream de visão geral das salas).
#[derive(Debug, Clone)]
pub enum UserEvent {
    /// O usuário passou a ser membro da sala.
    RoomJoined(i64),
    NewMessage(Arc<ChatMessageView>),
}

type Channels<T> = Arc<RwLock<HashMap<i64, broadcast::Sender<T>>>>;

/// Distribuição em memória das mensagens já gravadas. Canais são criados na primeira
/// assinatura e descartados quando um envio encontra o canal sem receptores.
#[derive(Clone, Default)]
pub struct ChatHub {
    rooms: Channels<Arc<ChatMessageView>>,
    users: Channels<UserEvent>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe_room(&self, room_id: i64) -> broadcast::Receiver<Arc<ChatMessageView>> {
        subscribe(&self.rooms, room_id).await
    }

    pub async fn subscribe_user(&self, user_id: i64) -> broadcast::Receiver<UserEvent> {
        subscribe(&self.users, user_id).await
    }

    /// Publica depois do commit. Devolve quantos streams de sala receberam a mensagem.
    pub async fn publish_message(&self, message: ChatMessageView, member_ids: &[i64]) -> usize {
        let message = Arc::new(message);
        let delivered = send(&self.rooms, message.room_id, message.clone()).await;
        for user_id in member_ids {
            send(&self.users, *user_id, UserEvent::NewMessage(message.clone())).await;
        }
        tracing::debug!(room_id = message.room_id, message_id = message.id, delivered, "Mensagem publicada no hub");
        delivered
    }

    pub async fn announce_room(&self, room_id: i64, member_ids: &[i64]) {
        for user_id in member_ids {
            send(&self.users, *user_id, UserEvent::RoomJoined(room_id)).await;
        }
    }

    #[cfg(test)]
    async fn open_room_channels(&self) -> usize {
        self.rooms.read().await.len()
    }
}

async fn subscribe<T: Clone>(channels: &Channels<T>, key: i64) -> broadcast::Receiver<T> {
    if let Some(sender) = channels.read().await.get(&key) {
        return sender.subscribe();
    }
    let mut map = channels.write().await;
    map.entry(key)
        .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
        .subscribe()
}

async fn send<T: Clone>(channels: &Channels<T>, key: i64, event: T) -> usize {
    let result = match channels.read().await.get(&key) {
        Some(sender) => sender.send(event),
        None => return 0,
    };
    match result {
        Ok(receivers) => receivers,
        Err(_) => {
            // Ninguém escutando: libera o canal se continuar sem receptores
            let mut map = channels.write().await;
            if map.get(&key).is_some_and(|s| s.receiver_count() == 0) {
                map.remove(&key);
            }
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chat::MessageType;
    use chrono::Utc;

    fn message(id: i64, room_id: i64) -> ChatMessageView {
        ChatMessageView {
            id,
            room_id,
            sender_id: 1,
            sender_name: "mariama".into(),
            content: "Camion chargé".into(),
            message_type: MessageType::Text,
            reply_to_id: None,
            reply_to: None,
            is_edited: false,
            edited_at: None,
            is_deleted: false,
            created_at: Utc::now(),
            attachments: vec![],
        }
    }

    #[tokio::test]
    async fn every_room_subscriber_receives_the_message() {
        let hub = ChatHub::new();
        let mut a = hub.subscribe_room(7).await;
        let mut b = hub.subscribe_room(7).await;

        assert_eq!(hub.publish_message(message(1, 7), &[]).await, 2);
        assert_eq!(a.recv().await.expect("a").id, 1);
        assert_eq!(b.recv().await.expect("b").id, 1);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let hub = ChatHub::new();
        let mut other = hub.subscribe_room(8).await;
        hub.publish_message(message(1, 7), &[]).await;
        assert!(matches!(other.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn members_get_message_and_room_announcements() {
        let hub = ChatHub::new();
        let mut user = hub.subscribe_user(3).await;

        hub.announce_room(7, &[3, 4]).await;
        hub.publish_message(message(5, 7), &[3, 4]).await;

        assert!(matches!(user.recv().await.expect("joined"), UserEvent::RoomJoined(7)));
        match user.recv().await.expect("message") {
            UserEvent::NewMessage(m) => assert_eq!(m.id, 5),
            other => panic!("evento inesperado: {other:?}"),
        }
    }

    #[tokio::test]
    async fn channel_without_receivers_is_dropped() {
        let hub = ChatHub::new();
        let rx = hub.subscribe_room(7).await;
        drop(rx);
        assert_eq!(hub.open_room_channels().await, 1);
        assert_eq!(hub.publish_message(message(1, 7), &[]).await, 0);
        assert_eq!(hub.open_room_channels().await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_sees_lagged() {
        let hub = ChatHub::new();
        let mut rx = hub.subscribe_room(7).await;
        for id in 0..(CHANNEL_CAPACITY as i64 + 5) {
            hub.publish_message(message(id, 7), &[]).await;
        }
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Lagged(_))));
    }
}
