//! CONNECT/CONNECTED negotiation: protocol version and heart-beat
//! interval, driven entirely through `Session`.

use std::time::{Duration, Instant};

use stomp_core::{Frame, Session, SessionState, StompVersion};

fn connected(version: &str, heart_beat: Option<&str>) -> Frame {
    let mut headers = vec![("version".to_string(), version.to_string())];
    if let Some(hb) = heart_beat {
        headers.push(("heart-beat".to_string(), hb.to_string()));
    }
    Frame::new("CONNECTED", headers, vec![])
}

#[test]
fn negotiates_highest_version_the_server_picks() {
    let mut session: Session<()> = Session::new();
    session
        .connect(
            &[StompVersion::V1_0, StompVersion::V1_1, StompVersion::V1_2],
            None,
            None,
            Some("broker"),
            None,
            Instant::now(),
        )
        .unwrap();
    session.receive(&connected("1.2", None), Instant::now()).unwrap();
    assert_eq!(session.version(), StompVersion::V1_2);
    assert_eq!(session.state(), SessionState::Connected);
}

#[test]
fn missing_version_header_falls_back_to_1_0() {
    let mut session: Session<()> = Session::new();
    session
        .connect(&[StompVersion::V1_0], None, None, None, None, Instant::now())
        .unwrap();
    session
        .receive(&Frame::new("CONNECTED", vec![], vec![]), Instant::now())
        .unwrap();
    assert_eq!(session.version(), StompVersion::V1_0);
}

#[test]
fn heart_beat_negotiation_takes_the_max_of_each_direction_unless_either_side_is_zero() {
    let mut session: Session<()> = Session::new();
    session
        .connect(
            &[StompVersion::V1_2],
            None,
            None,
            Some("h"),
            Some((2000, 1000)),
            Instant::now(),
        )
        .unwrap();
    session
        .receive(&connected("1.2", Some("500,4000")), Instant::now())
        .unwrap();
    // send = max(cx, sy) = max(2000, 4000) = 4000
    // receive = max(cy, sx) = max(1000, 500) = 1000
    assert_eq!(session.heart_beat(), (4000, 1000));
}

#[test]
fn either_side_requesting_zero_disables_that_direction() {
    let mut session: Session<()> = Session::new();
    session
        .connect(
            &[StompVersion::V1_2],
            None,
            None,
            Some("h"),
            Some((2000, 0)),
            Instant::now(),
        )
        .unwrap();
    session
        .receive(&connected("1.2", Some("9000,9000")), Instant::now())
        .unwrap();
    assert_eq!(session.heart_beat(), (9000, 0));
}

#[test]
fn server_negotiating_unrequested_version_is_rejected() {
    let mut session: Session<()> = Session::new();
    session
        .connect(&[StompVersion::V1_0], None, None, None, None, Instant::now())
        .unwrap();
    assert!(session.receive(&connected("1.2", None), Instant::now()).is_err());
}

#[test]
fn should_send_heart_beat_once_interval_elapses() {
    let mut session: Session<()> = Session::new();
    let t0 = Instant::now();
    session
        .connect(&[StompVersion::V1_2], None, None, Some("h"), Some((100, 0)), t0)
        .unwrap();
    session.receive(&connected("1.2", Some("0,100")), t0).unwrap();
    assert!(!session.should_send_heart_beat(t0 + Duration::from_millis(50)));
    assert!(session.should_send_heart_beat(t0 + Duration::from_millis(150)));
}
