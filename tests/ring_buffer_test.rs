//! Randomized ring buffer operations checked against a `VecDeque` model.

use std::collections::VecDeque;

use rand::Rng;

use prometheus_vpu::core::RingBuffer;

fn assert_matches(buffer: &RingBuffer<u32>, model: &VecDeque<u32>) {
    assert_eq!(buffer.size(), model.len());
    assert_eq!(buffer.is_empty(), model.is_empty());
    assert!(buffer.size() <= buffer.capacity());
    assert_eq!(buffer.peek(), model.front());
    let contents: Vec<u32> = buffer.iter().copied().collect();
    assert_eq!(contents, model.iter().copied().collect::<Vec<_>>());
    assert_eq!(buffer.get(model.len()), None);
}

#[test]
fn test_random_operations_match_model() {
    let mut rng = rand::rng();
    for _ in 0..20 {
        let mut buffer = RingBuffer::new(rng.random_range(1..8));
        let mut model = VecDeque::new();
        let mut capacity = buffer.capacity();

        for value in 0..500_u32 {
            match rng.random_range(0..10) {
                0..=3 => {
                    buffer.push(value);
                    model.push_back(value);
                }
                4..=5 => {
                    buffer.push_front(value);
                    model.push_front(value);
                }
                6..=8 => assert_eq!(buffer.pop(), model.pop_front()),
                _ => {
                    let target = rng.random_range(1..16);
                    buffer.truncate(target);
                    assert!(buffer.capacity() >= model.len());
                    capacity = buffer.capacity();
                }
            }
            assert!(buffer.capacity() >= capacity, "capacity shrank implicitly");
            capacity = buffer.capacity();
            assert_matches(&buffer, &model);
        }
    }
}

#[test]
fn test_growth_policy() {
    let mut buffer = RingBuffer::new(3);
    for value in 0..4_u32 {
        buffer.push(value);
    }
    // 2 * max(3 - 1, 1) + 1
    assert_eq!(buffer.capacity(), 5);

    buffer.clear();
    assert!(buffer.is_empty());
    assert_eq!(buffer.capacity(), 5);
    assert_eq!(buffer.pop(), None);
}
